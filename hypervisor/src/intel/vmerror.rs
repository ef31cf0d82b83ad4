//! Decoding of the VM-exit reason and of the exit qualification of EPT violations.

use {crate::error::HypervisorError, bitfield::bitfield, core::fmt};

/// The basic exit reasons routed to the hooking engine.
///
/// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: Table C-1. Basic Exit Reasons
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmxBasicExitReason {
    Cpuid = 10,
    Vmcall = 18,
    EptViolation = 48,
}

impl TryFrom<u32> for VmxBasicExitReason {
    type Error = HypervisorError;

    /// Converts the low 16 bits of the exit reason field into a `VmxBasicExitReason`.
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value & 0xFFFF {
            10 => Ok(VmxBasicExitReason::Cpuid),
            18 => Ok(VmxBasicExitReason::Vmcall),
            48 => Ok(VmxBasicExitReason::EptViolation),
            _ => Err(HypervisorError::UnhandledVmExit),
        }
    }
}

bitfield! {
    /// Exit qualification for EPT violations.
    ///
    /// Bits 0-2 describe the access that caused the violation, bits 3-5 the permissions the
    /// guest-physical address had when it happened.
    ///
    /// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: Table 28-7. Exit Qualification for EPT Violations
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct EptViolationExitQualification(u64);
    impl Debug;

    pub data_read, _: 0;
    pub data_write, _: 1;
    pub instruction_fetch, _: 2;
    pub readable, _: 3;
    pub writable, _: 4;
    pub executable, _: 5;
    pub guest_linear_address_valid, _: 7;
    pub caused_by_translation, _: 8;
}

impl EptViolationExitQualification {
    pub const fn from_exit_qualification(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for EptViolationExitQualification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "access R:{} W:{} X:{}, page R:{} W:{} X:{}",
            self.data_read(),
            self.data_write(),
            self.instruction_fetch(),
            self.readable(),
            self.writable(),
            self.executable()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reason_ignores_upper_bits() {
        assert_eq!(VmxBasicExitReason::try_from(48 | (1 << 31)), Ok(VmxBasicExitReason::EptViolation));
        assert_eq!(VmxBasicExitReason::try_from(10), Ok(VmxBasicExitReason::Cpuid));
        assert_eq!(VmxBasicExitReason::try_from(12), Err(HypervisorError::UnhandledVmExit));
    }

    #[test]
    fn test_qualification_of_write_to_execute_only_page() {
        // Data write on a page that only allows execution, with a valid linear address.
        let qualification = EptViolationExitQualification::from_exit_qualification(0b1_1010_0010);
        assert!(qualification.data_write());
        assert!(!qualification.data_read());
        assert!(!qualification.instruction_fetch());
        assert!(qualification.executable());
        assert!(!qualification.readable());
        assert!(qualification.guest_linear_address_valid());
        assert!(qualification.caused_by_translation());
    }

    #[test]
    fn test_qualification_of_fetch_from_read_write_page() {
        let qualification = EptViolationExitQualification::from_exit_qualification(0b1_1100);
        assert!(qualification.instruction_fetch());
        assert!(qualification.readable());
        assert!(qualification.writable());
        assert!(!qualification.executable());
    }
}
