//! Intel® 64 and IA-32 Architectures Software Developer's Manual: 29.3 THE EXTENDED PAGE TABLE MECHANISM (EPT)
//! The extended page-table mechanism (EPT) is a feature that can be used to support the virtualization of physical memory.
//! When EPT is in use, certain addresses that would normally be treated as physical addresses (and used to access memory) are instead treated as guest-physical addresses
//! Guest-physical addresses are translated by traversing a set of EPT paging structures to produce physical addresses that are used to access memory.
//!
//! The hooking engine only ever edits the last level of that hierarchy. A hooked frame must live in a
//! 2MB region that has been split into a 4KB page table, and `map_4kb` rewrites one entry of it.
//!
//! Credits to the work by Satoshi (https://github.com/tandasat/Hello-VT-rp/blob/main/hypervisor/src/intel_vt/epts.rs) and Matthias (https://github.com/not-matthias/amd_hypervisor/blob/main/hypervisor/src/svm/nested_page_table.rs).

use {
    crate::{config::MAX_SPLIT_LARGE_PAGES, error::HypervisorError, intel::addresses::PhysicalAddress},
    alloc::boxed::Box,
    bitfield::bitfield,
    heapless::LinearMap,
    log::*,
    spin::Mutex,
    x86::bits64::paging::{pt_index, VAddr, BASE_PAGE_SHIFT},
};

/// The operations the hooking engine needs from the extended page tables shared by all processors.
pub trait ExtendedPageTable {
    /// Maps the 4KB guest frame `guest_pa` to the host frame `host_pa` with `access_type` permissions.
    ///
    /// Mapping the same arguments twice leaves the entry unchanged. Cached translations are not
    /// invalidated; callers flush them afterwards.
    fn map_4kb(&self, guest_pa: PhysicalAddress, host_pa: PhysicalAddress, access_type: AccessType) -> Result<(), HypervisorError>;

    /// Returns a copy of the 4KB entry mapping `guest_pa`, if that frame is mapped at 4KB granularity.
    fn entry(&self, guest_pa: PhysicalAddress) -> Option<Entry>;
}

/// The 4KB EPT page tables that replace the 2MB large pages holding hooked frames.
///
/// The tables are kept in a map keyed by the guest physical address of the large page. The code
/// building the rest of the EPT hierarchy points the corresponding PDE at `page_table_pa`.
pub struct Ept {
    page_tables: Mutex<LinearMap<u64, Box<Pt>, MAX_SPLIT_LARGE_PAGES>>,
}

impl Ept {
    pub const fn new() -> Self {
        Self {
            page_tables: Mutex::new(LinearMap::new()),
        }
    }

    /// Splits the 2MB page containing `guest_pa` into 512 identity-mapped 4KB pages with
    /// read-write-execute access and `memory_type`.
    ///
    /// Splitting a page that is already split leaves its table untouched.
    pub fn split_2mb_to_4kb(&self, guest_pa: u64, memory_type: MemoryType) -> Result<(), HypervisorError> {
        let large_page_pa = PhysicalAddress::from_pa(guest_pa).align_down_to_large_page();
        let mut page_tables = self.page_tables.lock();

        if page_tables.contains_key(&large_page_pa.pa()) {
            trace!("Large page {:#x} is already split", large_page_pa);
            return Ok(());
        }

        trace!("Splitting 2MB page at {:#x} into 4KB pages", large_page_pa);
        let pt = Box::new(Pt::identity(large_page_pa, memory_type));

        page_tables
            .insert(large_page_pa.pa(), pt)
            .map_err(|_| HypervisorError::PageTablesAllocationError)?;

        Ok(())
    }

    /// Returns `true` if the 2MB page containing `guest_pa` has been split.
    pub fn is_split(&self, guest_pa: u64) -> bool {
        let large_page_pa = PhysicalAddress::from_pa(guest_pa).align_down_to_large_page();
        self.page_tables.lock().contains_key(&large_page_pa.pa())
    }

    /// Address of the 4KB page table backing the 2MB page containing `guest_pa`.
    pub fn page_table_pa(&self, guest_pa: u64) -> Option<u64> {
        let large_page_pa = PhysicalAddress::from_pa(guest_pa).align_down_to_large_page();
        self.page_tables
            .lock()
            .get(&large_page_pa.pa())
            .map(|pt| pt.as_ref() as *const Pt as u64)
    }
}

impl Default for Ept {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtendedPageTable for Ept {
    fn map_4kb(&self, guest_pa: PhysicalAddress, host_pa: PhysicalAddress, access_type: AccessType) -> Result<(), HypervisorError> {
        // Ensure both addresses are page aligned
        if !guest_pa.is_base_page_aligned() || !host_pa.is_base_page_aligned() {
            error!("Addresses are not aligned: GPA {:#x}, HPA {:#x}", guest_pa, host_pa);
            return Err(HypervisorError::UnalignedAddressError);
        }

        let large_page_pa = guest_pa.align_down_to_large_page();
        let mut page_tables = self.page_tables.lock();
        let pt = page_tables.get_mut(&large_page_pa.pa()).ok_or_else(|| {
            error!("No 4KB page table for GPA {:#x}", guest_pa);
            HypervisorError::PageTableNotFound
        })?;

        let pte = &mut pt.0.entries[pt_index(VAddr::from(guest_pa.pa()))];
        let old_hpa = pte.pfn() << BASE_PAGE_SHIFT;

        pte.set_readable(access_type.contains(AccessType::READ));
        pte.set_writable(access_type.contains(AccessType::WRITE));
        pte.set_executable(access_type.contains(AccessType::EXECUTE));
        pte.set_pfn(host_pa.pfn());

        trace!("Mapped GPA {:#x} from HPA {:#x} to HPA {:#x} with {:?}", guest_pa, old_hpa, host_pa, access_type);

        Ok(())
    }

    fn entry(&self, guest_pa: PhysicalAddress) -> Option<Entry> {
        let large_page_pa = guest_pa.align_down_to_large_page();
        self.page_tables
            .lock()
            .get(&large_page_pa.pa())
            .map(|pt| pt.0.entries[pt_index(VAddr::from(guest_pa.pa()))])
    }
}

/// Represents an EPT Page-Table Entry (PTE) that maps a 4-KByte Page.
///
/// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: Format of an EPT Page-Table Entry that Maps a 4-KByte Page
#[derive(Debug, Clone, Copy)]
pub struct Pt(Table);

impl Pt {
    /// A table mapping the 2MB page at `large_page_pa` onto itself with read-write-execute access.
    fn identity(large_page_pa: PhysicalAddress, memory_type: MemoryType) -> Self {
        let mut table = Table { entries: [Entry(0); 512] };

        for (i, pte) in table.entries.iter_mut().enumerate() {
            pte.set_readable(true);
            pte.set_writable(true);
            pte.set_executable(true);
            pte.set_memory_type(memory_type as u64);
            pte.set_pfn(large_page_pa.pfn() + i as u64);
        }

        Self(table)
    }
}

/// General struct to represent a table in the EPT paging structure.
#[repr(C, align(4096))]
#[derive(Debug, Clone, Copy)]
struct Table {
    entries: [Entry; 512],
}

bitfield! {
    /// Represents an Extended Page Table Entry (EPT Entry).
    ///
    /// EPT entries are used in Intel VT-x virtualization to manage memory access
    /// permissions and address mapping for virtual machines.
    ///
    /// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 29.3.2 EPT Translation Mechanism
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Entry(u64);
    impl Debug;

    // Flag definitions for an EPT entry.
    pub readable, set_readable: 0;
    pub writable, set_writable: 1;
    pub executable, set_executable: 2;
    pub memory_type, set_memory_type: 5, 3;
    pub pfn, set_pfn: 51, 12;
}

impl Entry {
    /// The access permissions granted by this entry.
    pub fn access_type(&self) -> AccessType {
        let mut access_type = AccessType::empty();
        access_type.set(AccessType::READ, self.readable());
        access_type.set(AccessType::WRITE, self.writable());
        access_type.set(AccessType::EXECUTE, self.executable());
        access_type
    }

    /// The host frame this entry maps to.
    pub fn host_pa(&self) -> PhysicalAddress {
        PhysicalAddress::from_pfn(self.pfn())
    }
}

bitflags::bitflags! {
    /// Represents the different access permissions for an EPT entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessType: u8 {
        /// The EPT entry allows read access.
        const READ = 0b001;
        /// The EPT entry allows write access.
        const WRITE = 0b010;
        /// The EPT entry allows execute access.
        const EXECUTE = 0b100;
        /// The EPT entry allows read and write access.
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        /// The EPT entry allows read, write, and execute access.
        const READ_WRITE_EXECUTE = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

/// The memory type of an EPT leaf entry.
///
/// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 12.3 METHODS OF CACHING AVAILABLE
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    Uncacheable = 0,
    WriteCombining = 1,
    WriteThrough = 4,
    WriteProtected = 5,
    WriteBack = 6,
}
