//! VM-exit dispatching and the handler contract shared by the hooking engine and its fallback.

use {
    crate::{
        error::HypervisorError,
        intel::{vm::Vm, vmerror::VmxBasicExitReason},
    },
    log::*,
};

pub mod cpuid;
pub mod default;
pub mod ept_violation;
pub mod vmcall;

#[cfg(test)]
mod tests;

/// Represents the type of VM exit.
#[derive(Debug, Clone, Copy, PartialOrd, PartialEq, Eq)]
pub enum ExitType {
    IncrementRIP,
    Continue,
}

/// Behaviour of a virtual processor on the VM exits the hooking engine cares about.
///
/// Every method runs on the logical processor that exited, before its guest resumes.
pub trait VmExitHandler {
    /// Called once per logical processor before its first VM entry.
    fn setup(&self, vm: &mut Vm<'_>) -> Result<(), HypervisorError>;

    fn handle_cpuid(&self, vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError>;

    fn handle_vmcall(&self, vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError>;

    fn handle_ept_violation(&self, vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError>;
}

/// Routes the exit described by `vm.exit_information` to `handler`.
///
/// When the handler asks for it, the guest RIP is moved past the exiting instruction.
///
/// # Errors
///
/// * `HypervisorError::UnhandledVmExit` for any exit reason other than CPUID, VMCALL and EPT violation.
/// * Any error returned by the handler itself.
pub fn handle_vmexit<H: VmExitHandler + ?Sized>(handler: &H, vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError> {
    let exit_reason = VmxBasicExitReason::try_from(vm.exit_information.exit_reason).map_err(|error| {
        error!("Unhandled VM exit reason: {:#x}", vm.exit_information.exit_reason);
        error
    })?;

    trace!("VM exit on processor {}: {:?}", vm.processor_index, exit_reason);

    let exit_type = match exit_reason {
        VmxBasicExitReason::Cpuid => handler.handle_cpuid(vm)?,
        VmxBasicExitReason::Vmcall => handler.handle_vmcall(vm)?,
        VmxBasicExitReason::EptViolation => handler.handle_ept_violation(vm)?,
    };

    if exit_type == ExitType::IncrementRIP {
        vm.advance_guest_rip();
    }

    Ok(exit_type)
}
