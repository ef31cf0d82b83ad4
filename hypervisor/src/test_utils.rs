//! In-memory stand-ins for the hardware collaborators, used by the unit tests.

use {
    crate::{
        error::HypervisorError,
        intel::{
            addresses::AddressSpace,
            capture::GuestRegisters,
            ept::{Ept, ExtendedPageTable, MemoryType},
            invept::TranslationCache,
            paging::PhysicalMemory,
            vm::{ExitInformation, Vm},
            vmexit::{ExitType, VmExitHandler},
        },
        logger::{SerialPort, UartComPort},
    },
    alloc::{collections::BTreeMap, string::String, vec::Vec},
    core::cell::Cell,
};

/// Guest root loaded while a hypercall resolves its pointers.
pub const GUEST_CR3: u64 = 0x3000_0000;

/// Root active on the host before any handler runs.
pub const HOST_CR3: u64 = 0x1ad000;

/// Guest VA of the page whose content data accesses observe.
pub const READ_PAGE_VA: u64 = 0x7ff6_0000_1000;

/// Guest VA of the intercepted page.
pub const EXEC_PAGE_VA: u64 = 0x7ff6_0000_2000;

/// Frames the two pages above are backed by.
pub const READ_FRAME: u64 = 0x1000;
pub const EXEC_FRAME: u64 = 0x2000;

/// Everything the installed serial logger has written.
pub static CONSOLE_OUTPUT: spin::Mutex<Vec<u8>> = spin::Mutex::new(Vec::new());

/// Serial console that appends to [`CONSOLE_OUTPUT`].
pub struct CapturedConsole;

impl CapturedConsole {
    pub const fn new(_port: UartComPort) -> Self {
        Self
    }
}

impl SerialPort for CapturedConsole {
    fn write_byte(&mut self, byte: u8) {
        CONSOLE_OUTPUT.lock().push(byte);
    }
}

pub fn console_output() -> String {
    String::from_utf8_lossy(&CONSOLE_OUTPUT.lock()).into_owned()
}

/// Physical memory made of sparse `u64` words. Unwritten words read as absent.
#[derive(Default)]
pub struct FakeMemory {
    words: BTreeMap<u64, u64>,
}

impl FakeMemory {
    pub fn write(&mut self, pa: u64, value: u64) {
        self.words.insert(pa, value);
    }
}

impl PhysicalMemory for FakeMemory {
    fn read_u64(&self, pa: u64) -> Option<u64> {
        self.words.get(&pa).copied()
    }
}

/// Per-root page mappings plus a log of every root switch.
pub struct FakeAddressSpace {
    active_root: u64,
    pages: BTreeMap<(u64, u64), u64>,
    pub loaded_roots: Vec<u64>,
}

impl FakeAddressSpace {
    pub fn new(root: u64) -> Self {
        Self {
            active_root: root,
            pages: BTreeMap::new(),
            loaded_roots: Vec::new(),
        }
    }

    pub fn map(&mut self, root: u64, va_page: u64, pa_page: u64) {
        self.pages.insert((root, va_page & !0xfff), pa_page & !0xfff);
    }
}

impl AddressSpace for FakeAddressSpace {
    fn active_root(&self) -> u64 {
        self.active_root
    }

    fn load_root(&mut self, root: u64) {
        self.active_root = root;
        self.loaded_roots.push(root);
    }

    fn translate(&self, va: u64) -> Result<u64, HypervisorError> {
        self.pages
            .get(&(self.active_root, va & !0xfff))
            .map(|page| page | (va & 0xfff))
            .ok_or(HypervisorError::InvalidPtEntry)
    }
}

/// Counts invalidations instead of issuing them.
#[derive(Default)]
pub struct CountingTlb {
    pub invept_calls: Cell<usize>,
    pub invvpid_calls: Cell<usize>,
}

impl CountingTlb {
    /// Number of complete `flush_all` sequences observed.
    pub fn flushes(&self) -> usize {
        self.invept_calls.get().min(self.invvpid_calls.get())
    }
}

impl TranslationCache for CountingTlb {
    fn invept_all_contexts(&self) {
        self.invept_calls.set(self.invept_calls.get() + 1);
    }

    fn invvpid_all_contexts(&self) {
        self.invvpid_calls.set(self.invvpid_calls.get() + 1);
    }
}

/// A default handler that records what reached it and answers CPUID with fixed values.
#[derive(Default)]
pub struct RecordingDefaultHandler {
    pub setup_calls: Cell<usize>,
    pub cpuid_calls: Cell<usize>,
    pub vmcall_calls: Cell<usize>,
    pub ept_violation_calls: Cell<usize>,
}

impl RecordingDefaultHandler {
    pub const CPUID_ANSWER: [u64; 4] = [0x11, 0x22, 0x33, 0x44];
}

impl VmExitHandler for RecordingDefaultHandler {
    fn setup(&self, _vm: &mut Vm<'_>) -> Result<(), HypervisorError> {
        self.setup_calls.set(self.setup_calls.get() + 1);
        Ok(())
    }

    fn handle_cpuid(&self, vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError> {
        self.cpuid_calls.set(self.cpuid_calls.get() + 1);
        let [rax, rbx, rcx, rdx] = Self::CPUID_ANSWER;
        vm.guest_registers.rax = rax;
        vm.guest_registers.rbx = rbx;
        vm.guest_registers.rcx = rcx;
        vm.guest_registers.rdx = rdx;
        Ok(ExitType::IncrementRIP)
    }

    fn handle_vmcall(&self, _vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError> {
        self.vmcall_calls.set(self.vmcall_calls.get() + 1);
        Ok(ExitType::Continue)
    }

    fn handle_ept_violation(&self, _vm: &mut Vm<'_>) -> Result<ExitType, HypervisorError> {
        self.ept_violation_calls.set(self.ept_violation_calls.get() + 1);
        Err(HypervisorError::UnexpectedEptViolation)
    }
}

/// The collaborators one simulated logical processor exits into.
pub struct Machine {
    pub ept: Ept,
    pub tlb: CountingTlb,
    pub address_space: FakeAddressSpace,
}

impl Machine {
    /// An EPT with the large page holding both hook frames split, and a guest root mapping the
    /// read and exec pages onto `READ_FRAME` and `EXEC_FRAME`.
    pub fn new() -> Self {
        let ept = Ept::new();
        ept.split_2mb_to_4kb(EXEC_FRAME, MemoryType::WriteBack).unwrap();

        let mut address_space = FakeAddressSpace::new(HOST_CR3);
        address_space.map(GUEST_CR3, READ_PAGE_VA, READ_FRAME);
        address_space.map(GUEST_CR3, EXEC_PAGE_VA, EXEC_FRAME);

        Self {
            ept,
            tlb: CountingTlb::default(),
            address_space,
        }
    }

    pub fn vm(&mut self, processor_index: usize, guest_registers: GuestRegisters, exit_information: ExitInformation) -> Vm<'_> {
        Vm::new(processor_index, guest_registers, exit_information, &self.ept, &self.tlb, &mut self.address_space)
    }

    pub fn ept_entry(&self, guest_pa: u64) -> crate::intel::ept::Entry {
        self.ept.entry(crate::intel::addresses::PhysicalAddress::from_pa(guest_pa)).unwrap()
    }
}

/// Exit information of a `CPUID`/`VMCALL` style exit taken with `guest_cr3` loaded.
pub fn instruction_exit(exit_reason: u32, instruction_length: u64) -> ExitInformation {
    ExitInformation {
        exit_reason,
        guest_cr3: GUEST_CR3,
        instruction_length,
        ..Default::default()
    }
}

/// Exit information of an EPT violation on `guest_physical_address`.
pub fn ept_violation_exit(guest_physical_address: u64, exit_qualification: u64) -> ExitInformation {
    ExitInformation {
        exit_reason: 48,
        exit_qualification,
        guest_physical_address,
        guest_cr3: GUEST_CR3,
        ..Default::default()
    }
}
