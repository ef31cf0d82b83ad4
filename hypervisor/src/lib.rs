//! This crate provides the VM-exit handlers of a split-view EPT hooking engine.
//!
//! A guest installs a hook through a hypercall. From then on, instruction fetches from the
//! hooked frame execute one page while data accesses to the same frame observe another,
//! by flipping the EPT entry between execute-only and read-write on every EPT violation.

#![cfg_attr(not(test), no_std)]

extern crate alloc;
extern crate static_assertions;

pub mod config;
pub mod error;
pub mod intel;
pub mod logger;
pub mod vmm;

#[cfg(test)]
mod test_utils;
