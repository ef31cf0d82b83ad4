//! Types and constants shared between the hypervisor and the guest-side client.
//!
//! Everything here describes the register ABI of the covert channel: the CPUID
//! probe used to detect the hypervisor and the VMCALL commands used to install
//! or remove a split-view page hook.

#![cfg_attr(not(test), no_std)]

/// CPUID leaf that makes the hypervisor answer with [`CPUID_PROBE_SIGNATURE`].
///
/// The value is the ASCII string "hvpp" stored little-endian.
pub const CPUID_PROBE_LEAF: u32 = 0x7070_7668;

/// The 16-byte ASCII signature returned for [`CPUID_PROBE_LEAF`].
pub const CPUID_PROBE_SIGNATURE: [u8; 16] = *b"hello from hvpp\0";

/// Splits [`CPUID_PROBE_SIGNATURE`] into the four little-endian words placed in
/// EAX, EBX, ECX and EDX, in that order.
pub const fn signature_registers() -> [u32; 4] {
    let s = CPUID_PROBE_SIGNATURE;
    [
        u32::from_le_bytes([s[0], s[1], s[2], s[3]]),
        u32::from_le_bytes([s[4], s[5], s[6], s[7]]),
        u32::from_le_bytes([s[8], s[9], s[10], s[11]]),
        u32::from_le_bytes([s[12], s[13], s[14], s[15]]),
    ]
}

/// Reassembles the signature bytes from the EAX, EBX, ECX and EDX values of a CPUID result.
pub fn signature_from_registers(eax: u32, ebx: u32, ecx: u32, edx: u32) -> [u8; 16] {
    let mut signature = [0u8; 16];
    for (chunk, word) in signature.chunks_exact_mut(4).zip([eax, ebx, ecx, edx]) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    signature
}

/// Enumeration of the hypercalls understood by the hooking engine.
///
/// The command code is passed in RCX. For [`HypercallCommand::InstallHook`] RDX holds the
/// virtual address of the page whose content data accesses should observe, and R8 the
/// virtual address of the page whose content should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum HypercallCommand {
    /// Installs a split-view hook on the page addressed by R8.
    InstallHook = 0xC1,

    /// Restores read-write-execute access on the page hooked by the calling processor.
    UninstallHook = 0xC2,
}

impl HypercallCommand {
    /// Converts a `u64` value to a `HypercallCommand` variant.
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0xC1 => Some(HypercallCommand::InstallHook),
            0xC2 => Some(HypercallCommand::UninstallHook),
            _ => None,
        }
    }
}

/// Represents the outcome of a hypercall, returned in RAX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failure,
}

impl CommandStatus {
    /// Converts `CommandStatus` to a u64 for returning in registers.
    pub fn to_u64(self) -> u64 {
        match self {
            CommandStatus::Success => 0x1,
            CommandStatus::Failure => 0x0,
        }
    }

    /// Converts a `u64` value to a `CommandStatus` enum variant.
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0x1 => Some(CommandStatus::Success),
            0x0 => Some(CommandStatus::Failure),
            _ => None,
        }
    }
}
