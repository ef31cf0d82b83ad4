pub mod addresses;
pub mod capture;
pub mod ept;
pub mod events;
pub mod hooks;
pub mod invept;
pub mod invvpid;
pub mod paging;
pub mod support;
pub mod vm;
pub mod vmerror;
pub mod vmexit;
