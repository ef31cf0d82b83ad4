//! Abstraction over physical addresses and the guest address-space switch used to resolve guest pointers.
//!
//! This module introduces the `PhysicalAddress` structure that simplifies operations around
//! physical addresses, the `AddressSpace` contract for the active translation root, and the
//! `Cr3Guard` that scopes a switch of that root.

use {
    crate::{
        error::HypervisorError,
        intel::{
            paging::{translate_virtual_to_physical, PhysicalMemory},
            support::{cr3, cr3_write},
        },
    },
    core::fmt,
    log::trace,
    x86::bits64::paging::{PAddr, BASE_PAGE_SHIFT},
};

/// A representation of physical addresses.
///
/// Provides utility methods to work with physical addresses and the 4KB frames they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalAddress(PAddr);

impl PhysicalAddress {
    /// Constructs a `PhysicalAddress` from a given physical address.
    pub fn from_pa(pa: u64) -> Self {
        Self(PAddr::from(pa))
    }

    /// Constructs a `PhysicalAddress` from a given page frame number (PFN).
    pub fn from_pfn(pfn: u64) -> Self {
        Self(PAddr::from(pfn << BASE_PAGE_SHIFT))
    }

    /// Retrieves the page frame number (PFN) for the physical address.
    pub fn pfn(&self) -> u64 {
        self.0.as_u64() >> BASE_PAGE_SHIFT
    }

    /// Retrieves the physical address.
    pub fn pa(&self) -> u64 {
        self.0.as_u64()
    }

    /// The 4KB frame containing this address.
    pub fn align_down_to_base_page(&self) -> Self {
        Self(self.0.align_down_to_base_page())
    }

    /// The 2MB large page containing this address.
    pub fn align_down_to_large_page(&self) -> Self {
        Self(self.0.align_down_to_large_page())
    }

    pub fn is_base_page_aligned(&self) -> bool {
        self.0.is_base_page_aligned()
    }
}

impl fmt::LowerHex for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.pa(), f)
    }
}

/// The translation root (CR3) of the processor running a VM-exit handler.
pub trait AddressSpace {
    /// Returns the currently loaded root.
    fn active_root(&self) -> u64;

    /// Makes `root` the active root.
    fn load_root(&mut self, root: u64);

    /// Translates `va` through the paging structures of the active root.
    fn translate(&self, va: u64) -> Result<u64, HypervisorError>;
}

/// The host's real CR3, with translations done by walking the paging structures it points to.
pub struct HostAddressSpace<M: PhysicalMemory> {
    memory: M,
}

impl<M: PhysicalMemory> HostAddressSpace<M> {
    pub fn new(memory: M) -> Self {
        Self { memory }
    }
}

impl<M: PhysicalMemory> AddressSpace for HostAddressSpace<M> {
    fn active_root(&self) -> u64 {
        cr3()
    }

    fn load_root(&mut self, root: u64) {
        cr3_write(root);
    }

    fn translate(&self, va: u64) -> Result<u64, HypervisorError> {
        translate_virtual_to_physical(&self.memory, cr3(), va)
    }
}

/// Switches the active root to a guest's CR3 for as long as the guard lives.
///
/// The previous root is restored when the guard is dropped, including on early returns, so
/// the processor never keeps running host code on the guest's paging structures.
pub struct Cr3Guard<'a, S: AddressSpace + ?Sized> {
    address_space: &'a mut S,
    previous_root: u64,
}

impl<'a, S: AddressSpace + ?Sized> Cr3Guard<'a, S> {
    /// Loads `root` into `address_space`, remembering the root it replaces.
    pub fn new(address_space: &'a mut S, root: u64) -> Self {
        let previous_root = address_space.active_root();
        trace!("Switching CR3 from {:#x} to {:#x}", previous_root, root);
        address_space.load_root(root);

        Self {
            address_space,
            previous_root,
        }
    }

    /// Converts a virtual address of the guarded address space to its physical address.
    pub fn pa_from_va(&self, va: u64) -> Result<PhysicalAddress, HypervisorError> {
        self.address_space.translate(va).map(PhysicalAddress::from_pa).map_err(|error| {
            trace!("Failed to translate {:#x}: {}", va, error);
            HypervisorError::VirtualToPhysicalAddressFailed
        })
    }
}

impl<S: AddressSpace + ?Sized> Drop for Cr3Guard<'_, S> {
    fn drop(&mut self) {
        self.address_space.load_root(self.previous_root);
        trace!("Restored CR3 {:#x}", self.previous_root);
    }
}
