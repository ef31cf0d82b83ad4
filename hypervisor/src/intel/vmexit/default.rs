//! The fallback behaviour for exits the hooking engine does not own.

use {
    crate::{
        error::HypervisorError,
        intel::{
            events::EventInjection,
            vm::Vm,
            vmexit::{ExitType, VmExitHandler},
        },
    },
    log::*,
    x86::cpuid::cpuid,
};

/// Behaves like bare hardware: CPUID reports the host processor, unknown hypercalls raise `#UD`
/// and EPT violations are never expected.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultVmExitHandler;

impl VmExitHandler for DefaultVmExitHandler {
    fn setup(&self, vm: &mut Vm<'_>) -> Result<(), HypervisorError> {
        debug!("Processor {} ready", vm.processor_index);
        Ok(())
    }

    fn handle_cpuid(&self, vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError> {
        let leaf = vm.guest_registers.rax as u32;
        let sub_leaf = vm.guest_registers.rcx as u32;

        let cpuid_result = cpuid!(leaf, sub_leaf);
        trace!(
            "CPUID passthrough {:#x}:{:#x} -> eax {:#x} ebx {:#x} ecx {:#x} edx {:#x}",
            leaf,
            sub_leaf,
            cpuid_result.eax,
            cpuid_result.ebx,
            cpuid_result.ecx,
            cpuid_result.edx
        );

        vm.guest_registers.rax = cpuid_result.eax as u64;
        vm.guest_registers.rbx = cpuid_result.ebx as u64;
        vm.guest_registers.rcx = cpuid_result.ecx as u64;
        vm.guest_registers.rdx = cpuid_result.edx as u64;

        Ok(ExitType::IncrementRIP)
    }

    fn handle_vmcall(&self, vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError> {
        warn!("Unknown hypercall {:#x}, injecting #UD", vm.guest_registers.rcx);

        // The guest takes the fault on the VMCALL itself, so RIP stays put.
        EventInjection::vmentry_inject_ud();

        Ok(ExitType::Continue)
    }

    fn handle_ept_violation(&self, vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError> {
        error!(
            "EPT violation at {:#x} with no hook to service it",
            vm.exit_information.guest_physical_address
        );
        Err(HypervisorError::UnexpectedEptViolation)
    }
}
