//! Invalidation of cached linear and combined mappings tagged with a VPID.
//!
//! Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 31.3 VMX INSTRUCTION REFERENCE, INVVPID

use core::arch::asm;

/// The types of INVVPID operations.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvvpidType {
    AllContext = 2,
}

/// The INVVPID descriptor.
#[repr(C)]
struct InvvpidDescriptor {
    vpid: u16,
    _reserved: [u16; 3],
    linear_address: u64,
}

/// Invalidates the mappings of every VPID.
pub fn invvpid_all_contexts() {
    invvpid(InvvpidType::AllContext, 0, 0);
}

fn invvpid(invalidation: InvvpidType, vpid: u16, linear_address: u64) {
    let descriptor = InvvpidDescriptor {
        vpid,
        _reserved: [0; 3],
        linear_address,
    };

    unsafe {
        asm!(
            "invvpid {0}, [{1}]",
            in(reg) invalidation as u64,
            in(reg) &descriptor,
            options(nostack),
        );
    }
}
