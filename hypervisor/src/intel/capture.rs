//! The guest register snapshot taken on every VM exit.
//!
//! The VM-exit stub of the dispatcher saves the general-purpose registers into a
//! `GuestRegisters` before any handler runs and reloads them on VM entry, so handlers
//! read their inputs from and write their results to this structure.

use {core::fmt, static_assertions::const_assert_eq};

/// Represents the state of guest general-purpose registers along with RFLAGS, RSP, and RIP.
#[repr(C, align(16))]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct GuestRegisters {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rsp: u64,
    pub rflags: u64,
}
const_assert_eq!(core::mem::size_of::<GuestRegisters>(), 0x90 /* 144 bytes */);

impl fmt::Debug for GuestRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GuestRegisters {\n")?;

        // General-purpose registers in 4 columns
        writeln!(
            f,
            "  rax: {:#018x}, rbx: {:#018x}, rcx: {:#018x}, rdx: {:#018x}",
            self.rax, self.rbx, self.rcx, self.rdx
        )?;
        writeln!(
            f,
            "  rsi: {:#018x}, rdi: {:#018x}, rbp: {:#018x}, r8: {:#018x}",
            self.rsi, self.rdi, self.rbp, self.r8
        )?;
        writeln!(
            f,
            "  r9: {:#018x}, r10: {:#018x}, r11: {:#018x}, r12: {:#018x}",
            self.r9, self.r10, self.r11, self.r12
        )?;
        writeln!(
            f,
            "  r13: {:#018x}, r14: {:#018x}, r15: {:#018x}, rip: {:#018x}",
            self.r13, self.r14, self.r15, self.rip
        )?;
        writeln!(f, "  rsp: {:#018x}, rflags: {:#018x}", self.rsp, self.rflags)?;

        f.write_str("}")
    }
}
