use {shared::HypercallCommand, thiserror::Error};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClientError {
    #[error("The hooking hypervisor did not answer the CPUID probe")]
    HypervisorNotPresent,

    #[error("The hypervisor refused {0:?}")]
    CommandFailed(HypercallCommand),

    #[error("The hypervisor answered {command:?} with unknown status {status:#x}")]
    UnexpectedStatus { command: HypercallCommand, status: u64 },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}
