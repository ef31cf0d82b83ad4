//! The VM-exit handler of the hooking engine.

use {
    crate::{
        error::HypervisorError,
        intel::{
            hooks::state::{HookState, HookStates},
            vm::Vm,
            vmexit::{cpuid, ept_violation, vmcall, ExitType, VmExitHandler},
        },
    },
    log::trace,
};

/// Owns the hook of every logical processor and a fallback handler `D`.
///
/// CPUID and VMCALL exits the engine does not recognise are forwarded to `D` unchanged.
/// EPT violations always belong to the engine.
pub struct HookManager<D> {
    default_handler: D,
    hook_states: HookStates,
}

impl<D: VmExitHandler> HookManager<D> {
    pub const fn new(default_handler: D) -> Self {
        Self {
            default_handler,
            hook_states: HookStates::new(),
        }
    }

    /// The hook currently recorded for `processor_index`.
    pub fn hook_state(&self, processor_index: usize) -> Result<Option<HookState>, HypervisorError> {
        self.hook_states.get(processor_index)
    }

    pub fn default_handler(&self) -> &D {
        &self.default_handler
    }
}

impl<D: VmExitHandler> VmExitHandler for HookManager<D> {
    fn setup(&self, vm: &mut Vm<'_>) -> Result<(), HypervisorError> {
        trace!("Setting up hook manager on processor {}", vm.processor_index);
        self.default_handler.setup(vm)
    }

    fn handle_cpuid(&self, vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError> {
        cpuid::handle_cpuid(vm, &self.default_handler)
    }

    fn handle_vmcall(&self, vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError> {
        vmcall::handle_vmcall(vm, &self.hook_states, &self.default_handler)
    }

    fn handle_ept_violation(&self, vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError> {
        ept_violation::handle_ept_violation(vm, &self.hook_states)
    }
}
