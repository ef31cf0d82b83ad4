//! Services the hypercalls that install and remove the split-view hook of the calling processor.
//!
//! Register ABI: RCX holds the command, RDX the virtual address of the read page, R8 the
//! virtual address of the exec page. The outcome is returned in RAX as a `CommandStatus`.

use {
    crate::{
        error::HypervisorError,
        intel::{
            addresses::{Cr3Guard, PhysicalAddress},
            ept::AccessType,
            hooks::state::{HookState, HookStates},
            vm::Vm,
            vmexit::{ExitType, VmExitHandler},
        },
    },
    log::*,
    shared::{CommandStatus, HypercallCommand},
};

/// Handles a `VMCALL` exit.
///
/// # Parameters
///
/// * `vm`: The virtual processor that executed `VMCALL`.
/// * `hook_states`: The hook of every logical processor.
/// * `default_handler`: The fallback for commands the engine does not own.
///
/// # Returns
///
/// * `Ok(ExitType::IncrementRIP)` once an install or uninstall command has been answered in RAX.
/// * Whatever `default_handler` returns for any other command.
/// * `Err(HypervisorError::InvalidProcessorIndex)` if the processor has no hook slot.
pub fn handle_vmcall<D: VmExitHandler + ?Sized>(vm: &mut Vm<'_>, hook_states: &HookStates, default_handler: &D) -> Result<ExitType, HypervisorError> {
    let Some(command) = HypercallCommand::from_u64(vm.guest_registers.rcx) else {
        return default_handler.handle_vmcall(vm);
    };

    debug!("Hypercall {:?} on processor {}", command, vm.processor_index);

    let status = match command {
        HypercallCommand::InstallHook => install_hook(vm, hook_states)?,
        HypercallCommand::UninstallHook => uninstall_hook(vm, hook_states)?,
    };

    debug!("Hypercall {:?} completed with {:?}", command, status);
    vm.guest_registers.rax = status.to_u64();

    Ok(ExitType::IncrementRIP)
}

/// Records the hook and makes its exec frame execute-only, so the first data access traps.
fn install_hook(vm: &mut Vm<'_>, hook_states: &HookStates) -> Result<CommandStatus, HypervisorError> {
    let read_page_va = vm.guest_registers.rdx;
    let exec_page_va = vm.guest_registers.r8;
    let guest_cr3 = vm.exit_information.guest_cr3;

    // Both pointers belong to the guest, so resolve them under its CR3. The guard is dropped
    // at the end of this block, before anything else happens.
    let frames = {
        let guard = Cr3Guard::new(&mut *vm.address_space, guest_cr3);
        guard
            .pa_from_va(read_page_va)
            .and_then(|read_pa| Ok((read_pa, guard.pa_from_va(exec_page_va)?)))
    };

    let (read_frame, exec_frame) = match frames {
        Ok((read_pa, exec_pa)) => (read_pa.align_down_to_base_page(), exec_pa.align_down_to_base_page()),
        Err(error) => {
            error!(
                "Failed to resolve hook pages {:#x} / {:#x} under guest CR3 {:#x}: {}",
                read_page_va, exec_page_va, guest_cr3, error
            );
            return Ok(CommandStatus::Failure);
        }
    };

    trace!("Read frame: {:#x}, exec frame: {:#x}", read_frame, exec_frame);

    hook_states.set(vm.processor_index, HookState { read_frame, exec_frame })?;

    Ok(remap(vm, exec_frame, exec_frame, AccessType::EXECUTE))
}

/// Restores the identity read-write-execute mapping of the hooked frame.
fn uninstall_hook(vm: &mut Vm<'_>, hook_states: &HookStates) -> Result<CommandStatus, HypervisorError> {
    let Some(state) = hook_states.get(vm.processor_index)? else {
        warn!("Processor {} has no hook to remove", vm.processor_index);
        return Ok(CommandStatus::Failure);
    };

    Ok(remap(vm, state.exec_frame, state.exec_frame, AccessType::READ_WRITE_EXECUTE))
}

/// Edits one EPT entry and, only if that worked, drops every cached translation.
fn remap(vm: &Vm<'_>, guest_frame: PhysicalAddress, host_frame: PhysicalAddress, access_type: AccessType) -> CommandStatus {
    match vm.ept.map_4kb(guest_frame, host_frame, access_type) {
        Ok(()) => {
            vm.tlb.flush_all();
            CommandStatus::Success
        }
        Err(error) => {
            error!("Failed to map {:#x} -> {:#x}: {}", guest_frame, host_frame, error);
            CommandStatus::Failure
        }
    }
}
