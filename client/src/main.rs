//! # Hypervisor Communicator
//!
//! Command line front end for the split-view hooking hypervisor.

use {
    crate::{
        error::ClientError,
        hypervisor_communicator::{page_offset, parse_address, HypervisorCommunicator},
    },
    clap::{Parser, Subcommand},
};

mod error;
mod hypervisor_communicator;

/// Command line arguments for the Hypervisor Communicator.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: CommandsArg,
}

#[derive(Subcommand)]
enum CommandsArg {
    /// Checks whether the hypervisor is running underneath
    Probe,
    /// Hooks a page on the current processor
    ///
    /// Hooks are per processor. Run `unhook` pinned to the same processor (for example with
    /// `taskset` or `start /affinity`), otherwise it is refused.
    Hook {
        /// Virtual address (hex) of the page data accesses should see
        #[arg(short, long, value_parser = parse_address)]
        read: u64,
        /// Virtual address (hex) of the page to intercept
        #[arg(short, long, value_parser = parse_address)]
        exec: u64,
    },
    /// Removes the hook of the current processor
    ///
    /// Only succeeds on the processor that ran `hook`; pin the process to it.
    Unhook,
}

fn main() {
    let cli = Cli::parse();

    if let Err(error) = run(&cli) {
        println!("Error: {}", error);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), ClientError> {
    let communicator = HypervisorCommunicator::new();

    let present = communicator.is_present();
    if let CommandsArg::Probe = cli.command {
        println!("Hypervisor {}", if present { "present" } else { "not present" });
        return Ok(());
    }

    if !present {
        return Err(ClientError::HypervisorNotPresent);
    }

    match cli.command {
        CommandsArg::Hook { read, exec } => {
            for address in [read, exec] {
                if page_offset(address) != 0 {
                    println!("{:#x} is not page aligned, hooking the page containing it", address);
                }
            }
            communicator.install_hook(read, exec)?;
            println!("Successfully hooked {:#x} (data view {:#x})", exec, read);
        }
        CommandsArg::Unhook => {
            communicator.uninstall_hook()?;
            println!("Successfully removed hook");
        }
        CommandsArg::Probe => {}
    }

    Ok(())
}
