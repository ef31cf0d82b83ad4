//! Invalidation of cached EPT translations and the `TranslationCache` contract used after every EPT edit.
//!
//! Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 29.4.3.1 Operations that Invalidate Cached Mappings

use {crate::intel::invvpid::invvpid_all_contexts, core::arch::asm};

/// Global invalidation of the translations derived from the EPT.
pub trait TranslationCache {
    /// Invalidates mappings tagged with any EPTP.
    fn invept_all_contexts(&self);

    /// Invalidates mappings tagged with any VPID.
    fn invvpid_all_contexts(&self);

    /// Drops every cached guest translation of every context, so an EPT edit becomes visible.
    fn flush_all(&self) {
        self.invept_all_contexts();
        self.invvpid_all_contexts();
    }
}

/// Issues `INVEPT` and `INVVPID` on the current processor.
pub struct HardwareTlb;

impl TranslationCache for HardwareTlb {
    fn invept_all_contexts(&self) {
        invept_all_contexts();
    }

    fn invvpid_all_contexts(&self) {
        invvpid_all_contexts();
    }
}

/// The types of INVEPT operations.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InveptType {
    AllContext = 2,
}

/// The INVEPT descriptor.
#[repr(C)]
struct InveptDescriptor {
    eptp: u64,
    _reserved: u64,
}

/// Invalidates all EPT-derived translations.
pub fn invept_all_contexts() {
    invept(InveptType::AllContext, 0);
}

fn invept(invalidation: InveptType, eptp: u64) {
    let descriptor = InveptDescriptor { eptp, _reserved: 0 };

    unsafe {
        asm!(
            "invept {0}, [{1}]",
            in(reg) invalidation as u64,
            in(reg) &descriptor,
            options(nostack),
        );
    }
}
