//! The per-exit view of a virtual processor handed to every VM-exit handler.

use {
    crate::intel::{
        addresses::AddressSpace,
        capture::GuestRegisters,
        ept::ExtendedPageTable,
        invept::TranslationCache,
        support::vmread,
    },
    x86::vmx::vmcs::{guest, ro},
};

/// The VMCS fields describing why and where the guest exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInformation {
    /// The exit reason field; bits 15:0 hold the basic exit reason.
    pub exit_reason: u32,
    pub exit_qualification: u64,
    pub guest_physical_address: u64,
    pub guest_linear_address: u64,
    /// The guest's CR3 at the time of the exit.
    pub guest_cr3: u64,
    pub instruction_length: u64,
}

impl ExitInformation {
    /// Reads the exit information of the current VMCS.
    pub fn capture() -> Self {
        Self {
            exit_reason: vmread(ro::EXIT_REASON) as u32,
            exit_qualification: vmread(ro::EXIT_QUALIFICATION),
            guest_physical_address: vmread(ro::GUEST_PHYSICAL_ADDR_FULL),
            guest_linear_address: vmread(ro::GUEST_LINEAR_ADDR),
            guest_cr3: vmread(guest::CR3),
            instruction_length: vmread(ro::VMEXIT_INSTRUCTION_LEN),
        }
    }
}

/// Everything a handler may read or change while servicing one VM exit.
///
/// The dispatcher builds a `Vm` from the registers saved by its exit stub and the fields of
/// [`ExitInformation`], runs the handler, and loads `guest_registers` back before resuming.
pub struct Vm<'a> {
    /// Index of the logical processor that exited.
    pub processor_index: usize,

    /// The guest's general-purpose registers state.
    pub guest_registers: GuestRegisters,

    pub exit_information: ExitInformation,

    /// The EPT shared by every logical processor.
    pub ept: &'a dyn ExtendedPageTable,

    pub tlb: &'a dyn TranslationCache,

    /// The translation root of this processor.
    pub address_space: &'a mut dyn AddressSpace,
}

impl<'a> Vm<'a> {
    pub fn new(
        processor_index: usize,
        guest_registers: GuestRegisters,
        exit_information: ExitInformation,
        ept: &'a dyn ExtendedPageTable,
        tlb: &'a dyn TranslationCache,
        address_space: &'a mut dyn AddressSpace,
    ) -> Self {
        Self {
            processor_index,
            guest_registers,
            exit_information,
            ept,
            tlb,
            address_space,
        }
    }

    /// Moves the guest RIP past the instruction that caused the exit.
    pub fn advance_guest_rip(&mut self) {
        self.guest_registers.rip = self
            .guest_registers
            .rip
            .wrapping_add(self.exit_information.instruction_length);
    }
}
