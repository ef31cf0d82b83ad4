//! Walks the guest's 4-level paging structures to turn a guest virtual address into a physical address.
//!
//! Intel® 64 and IA-32 Architectures Software Developer's Manual: 4.5 4-LEVEL PAGING AND 5-LEVEL PAGING
//!
//! Credits to the work by Satoshi in their 'Hello-VT-rp' project for assistance and a clear implementation of this Paging Structure:
//! https://github.com/tandasat/Hello-VT-rp/blob/main/hypervisor/src/paging_structures.rs

use {
    crate::error::HypervisorError,
    bitfield::bitfield,
    log::trace,
    x86::bits64::paging::{pd_index, pdpt_index, pml4_index, pt_index, VAddr, BASE_PAGE_SHIFT, BASE_PAGE_SIZE, HUGE_PAGE_SIZE, LARGE_PAGE_SIZE},
};

/// Bits 51:12 of CR3 hold the physical address of the PML4 table. The low bits carry the PCID
/// and bit 63 is the no-flush hint on a write.
const CR3_ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Source of the 64-bit paging-structure entries read during a page walk.
pub trait PhysicalMemory {
    /// Reads the 8-byte value stored at physical address `pa`, or `None` if it is not accessible.
    fn read_u64(&self, pa: u64) -> Option<u64>;
}

/// Reads physical memory by dereferencing the physical address directly.
#[derive(Clone, Copy)]
pub struct IdentityMappedMemory {
    _private: (),
}

impl IdentityMappedMemory {
    /// Creates the reader.
    ///
    /// # Safety
    ///
    /// Physical memory must be identity mapped in every address space that is active while the
    /// reader is used, so that physical address `pa` is readable at virtual address `pa`.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PhysicalMemory for IdentityMappedMemory {
    fn read_u64(&self, pa: u64) -> Option<u64> {
        if pa == 0 {
            return None;
        }

        // Guaranteed readable by the contract of `IdentityMappedMemory::new`.
        Some(unsafe { core::ptr::read_volatile(pa as *const u64) })
    }
}

/// Translates a virtual address to a physical address by walking the paging structures rooted at `cr3`.
///
/// Handles 4KB pages as well as 2MB and 1GB large pages.
///
/// # Arguments
///
/// * `memory` - The reader used to fetch paging-structure entries.
/// * `cr3` - The CR3 value whose paging structures are walked.
/// * `va` - The virtual address to translate.
///
/// # Returns
///
/// The translated physical address, or the error of the first level that is not present.
pub fn translate_virtual_to_physical<M: PhysicalMemory + ?Sized>(memory: &M, cr3: u64, va: u64) -> Result<u64, HypervisorError> {
    let guest_va = VAddr::from(va);

    let pml4e = read_entry(memory, cr3 & CR3_ADDRESS_MASK, pml4_index(guest_va)).ok_or(HypervisorError::InvalidPml4Entry)?;
    if !pml4e.present() {
        trace!("PML4 entry is not present: {:#x}", va);
        return Err(HypervisorError::InvalidPml4Entry);
    }

    let pdpte = read_entry(memory, pml4e.base(), pdpt_index(guest_va)).ok_or(HypervisorError::InvalidPdptEntry)?;
    if !pdpte.present() {
        trace!("PDPT entry is not present: {:#x}", va);
        return Err(HypervisorError::InvalidPdptEntry);
    }

    // 1GB page
    if pdpte.large() {
        return Ok(large_page_pa(pdpte, va, HUGE_PAGE_SIZE as u64));
    }

    let pde = read_entry(memory, pdpte.base(), pd_index(guest_va)).ok_or(HypervisorError::InvalidPdEntry)?;
    if !pde.present() {
        trace!("PD entry is not present: {:#x}", va);
        return Err(HypervisorError::InvalidPdEntry);
    }

    // 2MB page
    if pde.large() {
        return Ok(large_page_pa(pde, va, LARGE_PAGE_SIZE as u64));
    }

    let pte = read_entry(memory, pde.base(), pt_index(guest_va)).ok_or(HypervisorError::InvalidPtEntry)?;
    if !pte.present() {
        trace!("PT entry is not present: {:#x}", va);
        return Err(HypervisorError::InvalidPtEntry);
    }

    Ok(pte.base() | (va & (BASE_PAGE_SIZE as u64 - 1)))
}

fn read_entry<M: PhysicalMemory + ?Sized>(memory: &M, table_pa: u64, index: usize) -> Option<Entry> {
    memory.read_u64(table_pa + (index as u64) * 8).map(Entry)
}

// Bit 12 of a large-page entry is PAT, not part of the frame, so the frame is masked by the page size.
fn large_page_pa(entry: Entry, va: u64, page_size: u64) -> u64 {
    (entry.base() & !(page_size - 1)) | (va & (page_size - 1))
}

bitfield! {
    /// Represents a paging-structure entry of the 4-level paging hierarchy.
    ///
    /// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: Table 4-15 to Table 4-20
    #[derive(Clone, Copy)]
    pub struct Entry(u64);
    impl Debug;

    pub present, _: 0;
    pub large, _: 7;
    pub pfn, _: 51, 12;
}

impl Entry {
    /// Physical address of the table or page referenced by this entry.
    fn base(&self) -> u64 {
        self.pfn() << BASE_PAGE_SHIFT
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::test_utils::FakeMemory};

    const PML4: u64 = 0x10_0000;
    const PDPT: u64 = 0x11_0000;
    const PD: u64 = 0x12_0000;
    const PT: u64 = 0x13_0000;

    // 0xffff_8000_0040_3123 -> pml4 256, pdpt 0, pd 2, pt 3, offset 0x123
    const VA: u64 = 0xffff_8000_0040_3123;

    fn table_entry(pa: u64) -> u64 {
        pa | 0b11
    }

    fn memory_with_4kb_page() -> FakeMemory {
        let mut memory = FakeMemory::default();
        memory.write(PML4 + 256 * 8, table_entry(PDPT));
        memory.write(PDPT, table_entry(PD));
        memory.write(PD + 2 * 8, table_entry(PT));
        memory.write(PT + 3 * 8, table_entry(0x7_5000));
        memory
    }

    #[test]
    fn test_translate_4kb_page() {
        let memory = memory_with_4kb_page();
        assert_eq!(translate_virtual_to_physical(&memory, PML4, VA), Ok(0x7_5123));
    }

    #[test]
    fn test_translate_ignores_cr3_flag_bits() {
        let memory = memory_with_4kb_page();
        let cr3 = PML4 | 0x5 | (1 << 63);
        assert_eq!(translate_virtual_to_physical(&memory, cr3, VA), Ok(0x7_5123));
    }

    #[test]
    fn test_translate_2mb_page() {
        let mut memory = memory_with_4kb_page();
        // Large page with the PAT bit (12) set, which must not leak into the address.
        memory.write(PD + 2 * 8, 0x4000_0000 | (1 << 12) | (1 << 7) | 0b11);
        assert_eq!(translate_virtual_to_physical(&memory, PML4, VA), Ok(0x4000_3123));
    }

    #[test]
    fn test_translate_1gb_page() {
        let mut memory = memory_with_4kb_page();
        memory.write(PDPT, 0x8000_0000 | (1 << 7) | 0b11);
        assert_eq!(translate_virtual_to_physical(&memory, PML4, VA), Ok(0x8040_3123));
    }

    #[test]
    fn test_translate_reports_missing_level() {
        let mut memory = memory_with_4kb_page();
        memory.write(PT + 3 * 8, 0);
        assert_eq!(translate_virtual_to_physical(&memory, PML4, VA), Err(HypervisorError::InvalidPtEntry));

        memory.write(PML4 + 256 * 8, 0);
        assert_eq!(translate_virtual_to_physical(&memory, PML4, VA), Err(HypervisorError::InvalidPml4Entry));
    }

    #[test]
    fn test_translate_unreadable_table() {
        let memory = FakeMemory::default();
        assert_eq!(translate_virtual_to_physical(&memory, PML4, VA), Err(HypervisorError::InvalidPml4Entry));
    }
}
