use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HypervisorError {
    #[error("Failed to convert from virtual address to physical address")]
    VirtualToPhysicalAddressFailed,

    #[error("Invalid PML4 entry")]
    InvalidPml4Entry,

    #[error("Invalid PDPT entry")]
    InvalidPdptEntry,

    #[error("Invalid PD entry")]
    InvalidPdEntry,

    #[error("Invalid PT entry")]
    InvalidPtEntry,

    #[error("Unaligned address error")]
    UnalignedAddressError,

    #[error("Page table not found")]
    PageTableNotFound,

    #[error("Failed to allocate page tables")]
    PageTablesAllocationError,

    #[error("Logical processor index out of range")]
    InvalidProcessorIndex,

    #[error("No hook installed on this logical processor")]
    HookStateNotFound,

    #[error("EPT violation on a frame that is not hooked by this logical processor")]
    UnexpectedEptViolation,

    #[error("A logger is already installed")]
    LoggerAlreadyInitialized,

    #[error("Unhandled VmExit")]
    UnhandledVmExit,
}
