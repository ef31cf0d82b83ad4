//! Runs the hooking engine on the processor that took a VM exit.
//!
//! The VMX bring-up code owns the exit stub. On every exit it saves the guest's general-purpose
//! registers, calls [`HookingEngine::handle_vmexit`] and resumes the guest with the registers it
//! gets back.

use {
    crate::{
        config::LOGGING_LEVEL,
        error::HypervisorError,
        intel::{
            addresses::HostAddressSpace,
            capture::GuestRegisters,
            ept::Ept,
            hooks::hook_manager::HookManager,
            invept::HardwareTlb,
            paging::IdentityMappedMemory,
            support::{vmread, vmwrite},
            vm::{ExitInformation, Vm},
            vmexit::{handle_vmexit, ExitType, VmExitHandler},
        },
        logger::init_uart_logger,
    },
    log::*,
    x86::vmx::vmcs::guest,
};

/// The hook manager together with the EPT it edits, shared by every logical processor.
pub struct HookingEngine<D> {
    hook_manager: HookManager<D>,
    ept: Ept,
    memory: IdentityMappedMemory,
}

impl<D: VmExitHandler> HookingEngine<D> {
    /// Creates the engine with `default_handler` as the fallback for exits it does not own.
    ///
    /// # Safety
    ///
    /// Physical memory must be identity mapped in every guest address space whose pointers are
    /// passed to the install hypercall, see [`IdentityMappedMemory::new`].
    pub const unsafe fn new(default_handler: D) -> Self {
        Self {
            hook_manager: HookManager::new(default_handler),
            ept: Ept::new(),
            memory: IdentityMappedMemory::new(),
        }
    }

    /// Starts logging to the serial console at `LOGGING_LEVEL`.
    ///
    /// Call once, on the bootstrap processor, before any processor is set up.
    pub fn init(&self) -> Result<(), HypervisorError> {
        init_uart_logger(LOGGING_LEVEL)?;
        info!("Hooking engine initialized");
        Ok(())
    }

    /// The EPT page tables. Large pages holding frames that may be hooked must be split first.
    pub fn ept(&self) -> &Ept {
        &self.ept
    }

    pub fn hook_manager(&self) -> &HookManager<D> {
        &self.hook_manager
    }

    /// Prepares `processor_index` before its first VM entry.
    pub fn setup_processor(&self, processor_index: usize, guest_registers: &GuestRegisters) -> Result<(), HypervisorError> {
        let mut address_space = HostAddressSpace::new(self.memory);
        let mut vm = Vm::new(
            processor_index,
            *guest_registers,
            ExitInformation::default(),
            &self.ept,
            &HardwareTlb,
            &mut address_space,
        );

        self.hook_manager.setup(&mut vm)
    }

    /// Handles the VM exit pending on the current processor.
    ///
    /// # Arguments
    ///
    /// * `processor_index` - Index of the current logical processor.
    /// * `guest_registers` - The registers saved by the exit stub. Updated in place with the values
    ///   the guest resumes with; RIP, RSP and RFLAGS are also written back to the VMCS.
    ///
    /// # Returns
    ///
    /// How the guest should resume, or the error that prevented handling the exit.
    ///
    /// # Errors
    ///
    /// On `Err` nothing was remapped and the registers were not touched, so resuming the guest
    /// replays the same exit. Hook state is per processor while the EPT is shared: once any
    /// processor installs a hook, every other processor touching that frame exits with
    /// `HookStateNotFound`. The exit stub must not resume on these errors as if the exit had been
    /// handled. It can either treat them as fatal, or restore the frame through [`Self::ept`]
    /// (`map_4kb` to itself with `READ_WRITE_EXECUTE`), flush the caches and resume.
    pub fn handle_vmexit(&self, processor_index: usize, guest_registers: &mut GuestRegisters) -> Result<ExitType, HypervisorError> {
        guest_registers.rip = vmread(guest::RIP);
        guest_registers.rsp = vmread(guest::RSP);
        guest_registers.rflags = vmread(guest::RFLAGS);

        let mut address_space = HostAddressSpace::new(self.memory);
        let mut vm = Vm::new(
            processor_index,
            *guest_registers,
            ExitInformation::capture(),
            &self.ept,
            &HardwareTlb,
            &mut address_space,
        );

        let exit_type = handle_vmexit(&self.hook_manager, &mut vm).map_err(|error| {
            error!("Processor {} failed to handle VM exit: {}", processor_index, error);
            error
        })?;

        *guest_registers = vm.guest_registers;
        vmwrite(guest::RIP, guest_registers.rip);
        vmwrite(guest::RSP, guest_registers.rsp);
        vmwrite(guest::RFLAGS, guest_registers.rflags);

        Ok(exit_type)
    }
}
