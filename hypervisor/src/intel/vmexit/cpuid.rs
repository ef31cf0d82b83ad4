//! Answers the CPUID probe that lets a guest detect the hooking engine.

use {
    crate::{
        error::HypervisorError,
        intel::{
            vm::Vm,
            vmexit::{ExitType, VmExitHandler},
        },
    },
    log::trace,
    shared::{signature_registers, CPUID_PROBE_LEAF},
};

/// Handles a `CPUID` exit.
///
/// The probe leaf is answered with the signature in EAX, EBX, ECX and EDX. Every other leaf
/// is left to `default_handler`.
///
/// # Parameters
///
/// * `vm`: The virtual processor that executed `CPUID`.
/// * `default_handler`: The fallback for leaves the engine does not own.
///
/// # Returns
///
/// `ExitType::IncrementRIP` for the probe leaf, otherwise whatever `default_handler` returns.
pub fn handle_cpuid<D: VmExitHandler + ?Sized>(vm: &mut Vm<'_>, default_handler: &D) -> Result<ExitType, HypervisorError> {
    let leaf = vm.guest_registers.rax as u32;

    if leaf != CPUID_PROBE_LEAF {
        return default_handler.handle_cpuid(vm);
    }

    trace!("CPUID probe on processor {}", vm.processor_index);

    let [eax, ebx, ecx, edx] = signature_registers();
    vm.guest_registers.rax = eax as u64;
    vm.guest_registers.rbx = ebx as u64;
    vm.guest_registers.rcx = ecx as u64;
    vm.guest_registers.rdx = edx as u64;

    Ok(ExitType::IncrementRIP)
}
