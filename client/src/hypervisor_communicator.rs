//! # Hypervisor Communicator
//!
//! Talks to the hooking hypervisor from inside the guest: `CPUID` detects it, `VMCALL`
//! installs and removes the split-view hook of the processor the caller runs on.

use {
    crate::error::ClientError,
    shared::{signature_from_registers, CommandStatus, HypercallCommand, CPUID_PROBE_LEAF, CPUID_PROBE_SIGNATURE},
    std::arch::asm,
    x86::bits64::paging::BASE_PAGE_SIZE,
};

/// Struct to encapsulate the result of a CPUID instruction.
#[derive(Debug)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Struct to encapsulate the functionality for communicating with the hypervisor.
pub struct HypervisorCommunicator;

impl HypervisorCommunicator {
    /// Creates a new instance of `HypervisorCommunicator`.
    pub fn new() -> Self {
        Self
    }

    /// Executes `CPUID` with `leaf` in EAX and a zero sub-leaf.
    pub fn cpuid(&self, leaf: u32) -> CpuidResult {
        let mut eax = leaf as u64;
        let ebx: u64;
        let mut ecx = 0u64;
        let edx: u64;

        // RBX is reserved by LLVM, so it is saved around the instruction by hand.
        unsafe {
            asm!(
            "mov {0:r}, rbx",
            "cpuid",
            "xchg {0:r}, rbx",
            out(reg) ebx,
            inout("rax") eax,
            inout("rcx") ecx,
            out("rdx") edx,
            options(nostack, preserves_flags),
            );
        }

        CpuidResult {
            eax: eax as u32,
            ebx: ebx as u32,
            ecx: ecx as u32,
            edx: edx as u32,
        }
    }

    /// Returns `true` if the probe leaf comes back with the hypervisor's signature.
    pub fn is_present(&self) -> bool {
        let result = self.cpuid(CPUID_PROBE_LEAF);
        signature_from_registers(result.eax, result.ebx, result.ecx, result.edx) == CPUID_PROBE_SIGNATURE
    }

    /// Issues `VMCALL` with `command` in RCX, `rdx` and `r8` as arguments, and returns RAX.
    ///
    /// Without the hypervisor underneath, the instruction raises `#UD`. Callers should check
    /// [`HypervisorCommunicator::is_present`] first.
    pub fn vmcall(&self, command: HypercallCommand, rdx: u64, r8: u64) -> u64 {
        let rax: u64;

        unsafe {
            asm!(
            "vmcall",
            in("rcx") command as u64,
            in("rdx") rdx,
            in("r8") r8,
            lateout("rax") rax,
            options(nostack),
            );
        }

        rax
    }

    /// Hooks the page at `exec_page` on the current processor: code fetched from it keeps running
    /// its own bytes, data accesses to it see the page at `read_page`.
    ///
    /// Both pages must be resident; the hypervisor resolves them through the caller's page tables.
    pub fn install_hook(&self, read_page: u64, exec_page: u64) -> Result<(), ClientError> {
        let command = HypercallCommand::InstallHook;
        check_status(command, self.vmcall(command, read_page, exec_page))
    }

    /// Removes the hook installed earlier on the current processor.
    pub fn uninstall_hook(&self) -> Result<(), ClientError> {
        let command = HypercallCommand::UninstallHook;
        check_status(command, self.vmcall(command, 0, 0))
    }
}

/// Interprets the RAX value returned for `command`.
pub fn check_status(command: HypercallCommand, rax: u64) -> Result<(), ClientError> {
    match CommandStatus::from_u64(rax) {
        Some(CommandStatus::Success) => Ok(()),
        Some(CommandStatus::Failure) => Err(ClientError::CommandFailed(command)),
        None => Err(ClientError::UnexpectedStatus { command, status: rax }),
    }
}

/// Parses a virtual address written in hex, with or without a `0x` prefix.
pub fn parse_address(value: &str) -> Result<u64, ClientError> {
    let digits = value.trim_start_matches("0x").trim_start_matches("0X").replace('_', "");

    u64::from_str_radix(&digits, 16).map_err(|_| ClientError::InvalidAddress(value.to_string()))
}

/// Offset of `address` inside its 4KB page. The hypervisor hooks whole pages.
pub fn page_offset(address: u64) -> u64 {
    address & (BASE_PAGE_SIZE as u64 - 1)
}
