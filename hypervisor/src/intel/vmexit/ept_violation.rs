//! Flips the hooked frame between its two views whenever the guest touches it the "wrong" way.
//!
//! While execute-only, the frame maps onto itself and any data access traps. While read-write,
//! it maps onto the read frame and any instruction fetch traps. Which view is active is never
//! stored: it follows from the access that caused the violation.

use {
    crate::{
        error::HypervisorError,
        intel::{
            addresses::PhysicalAddress,
            ept::AccessType,
            hooks::state::HookStates,
            vm::Vm,
            vmerror::EptViolationExitQualification,
            vmexit::ExitType,
        },
    },
    log::*,
};

/// Handles an EPT violation on the hooked frame of the current processor.
///
/// # Returns
///
/// * `Ok(ExitType::Continue)`: the mapping was swapped and the faulting instruction is retried.
/// * `Err(HypervisorError::HookStateNotFound)`: the processor never installed a hook.
/// * `Err(HypervisorError::UnexpectedEptViolation)`: the violation is on another frame.
pub fn handle_ept_violation(vm: &mut Vm<'_>, hook_states: &HookStates) -> Result<ExitType, HypervisorError> {
    let guest_pa = vm.exit_information.guest_physical_address;
    let qualification = EptViolationExitQualification::from_exit_qualification(vm.exit_information.exit_qualification);

    trace!("EPT violation at GPA {:#x}: {}", guest_pa, qualification);

    let Some(state) = hook_states.get(vm.processor_index)? else {
        error!("EPT violation at {:#x} on processor {} without a hook", guest_pa, vm.processor_index);
        return Err(HypervisorError::HookStateNotFound);
    };

    let faulting_frame = PhysicalAddress::from_pa(guest_pa).align_down_to_base_page();
    if faulting_frame != state.exec_frame {
        error!("EPT violation at {:#x} outside hooked frame {:#x}", guest_pa, state.exec_frame);
        return Err(HypervisorError::UnexpectedEptViolation);
    }

    if qualification.data_read() || qualification.data_write() {
        trace!("Data access, showing read frame {:#x}", state.read_frame);
        vm.ept.map_4kb(state.exec_frame, state.read_frame, AccessType::READ_WRITE)?;
    } else if qualification.instruction_fetch() {
        trace!("Instruction fetch, showing exec frame {:#x}", state.exec_frame);
        vm.ept.map_4kb(state.exec_frame, state.exec_frame, AccessType::EXECUTE)?;
    } else {
        warn!("EPT violation at {:#x} reports no access: {}", guest_pa, qualification);
    }

    vm.tlb.flush_all();

    Ok(ExitType::Continue)
}
