//! Injection of exceptions into the guest on the next VM entry.
//!
//! Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 27.6 EVENT INJECTION

use {
    crate::intel::support::vmwrite,
    bitfield::bitfield,
    x86::vmx::vmcs,
};

/// Exception vectors that the hypervisor injects.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionVector {
    InvalidOpcode = 6,
}

/// The interruption types of the VM-entry interruption-information field.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionType {
    HardwareException = 3,
}

bitfield! {
    /// The VM-entry interruption-information field.
    ///
    /// Reference: Table 25-17. Format of the VM-Entry Interruption-Information Field
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct EventInjection(u32);
    impl Debug;

    pub vector, set_vector: 7, 0;
    pub interruption_type, set_interruption_type: 10, 8;
    pub deliver_error_code, set_deliver_error_code: 11;
    pub valid, set_valid: 31;
}

impl EventInjection {
    /// A valid `#UD` hardware exception without an error code.
    pub fn invalid_opcode() -> Self {
        let mut event = Self(0);
        event.set_vector(ExceptionVector::InvalidOpcode as u32);
        event.set_interruption_type(InterruptionType::HardwareException as u32);
        event.set_deliver_error_code(false);
        event.set_valid(true);
        event
    }

    /// Injects `#UD` into the guest on the next VM entry.
    pub fn vmentry_inject_ud() {
        vmwrite(vmcs::control::VMENTRY_INTERRUPTION_INFO_FIELD, Self::invalid_opcode().0);
    }
}
