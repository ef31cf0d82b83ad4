//! The per-processor record of the active split-view hook.

use {
    crate::{config::MAX_LOGICAL_PROCESSORS, error::HypervisorError, intel::addresses::PhysicalAddress},
    core::cell::UnsafeCell,
};

/// The frame pair of a hook installed by one logical processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookState {
    /// Frame whose content data reads and writes to `exec_frame` observe.
    pub read_frame: PhysicalAddress,

    /// The guest frame being intercepted. Instruction fetches from it execute its own content.
    pub exec_frame: PhysicalAddress,
}

/// One hook slot per logical processor.
///
/// A slot is empty until its processor installs a hook, is overwritten by every later install
/// and is never cleared.
pub struct HookStates {
    slots: [UnsafeCell<Option<HookState>>; MAX_LOGICAL_PROCESSORS],
}

// SAFETY: slot `i` is only read and written by logical processor `i`, from inside its own VM-exit
// handlers. A handler runs to completion before the processor resumes its guest and takes
// another exit, so no slot ever has two accessors at once and no locking is needed.
unsafe impl Sync for HookStates {}

impl HookStates {
    const EMPTY_SLOT: UnsafeCell<Option<HookState>> = UnsafeCell::new(None);

    pub const fn new() -> Self {
        Self {
            slots: [Self::EMPTY_SLOT; MAX_LOGICAL_PROCESSORS],
        }
    }

    /// Returns the hook of `processor_index`, or `None` if it never installed one.
    pub fn get(&self, processor_index: usize) -> Result<Option<HookState>, HypervisorError> {
        let slot = self.slot(processor_index)?;

        // Only the owning processor reaches its slot, see the `Sync` impl.
        Ok(unsafe { *slot.get() })
    }

    /// Replaces the hook of `processor_index` with `state` in a single store.
    pub fn set(&self, processor_index: usize, state: HookState) -> Result<(), HypervisorError> {
        let slot = self.slot(processor_index)?;

        // Only the owning processor reaches its slot, see the `Sync` impl.
        unsafe { *slot.get() = Some(state) };

        Ok(())
    }

    fn slot(&self, processor_index: usize) -> Result<&UnsafeCell<Option<HookState>>, HypervisorError> {
        self.slots
            .get(processor_index)
            .ok_or(HypervisorError::InvalidProcessorIndex)
    }
}

impl Default for HookStates {
    fn default() -> Self {
        Self::new()
    }
}
