//! End-to-end runs of the hooking engine through the VM-exit dispatcher.

use {
    super::*,
    crate::{
        intel::{
            addresses::PhysicalAddress,
            capture::GuestRegisters,
            ept::AccessType,
            hooks::{hook_manager::HookManager, state::HookState},
            vm::ExitInformation,
        },
        test_utils::*,
    },
    shared::{signature_registers, CommandStatus, CPUID_PROBE_LEAF},
};

const GUEST_RIP: u64 = 0xfffff800_1000_0000;

fn exit(machine: &mut Machine, manager: &HookManager<RecordingDefaultHandler>, registers: GuestRegisters, exit_information: ExitInformation) -> (Result<ExitType, HypervisorError>, GuestRegisters) {
    let mut vm = machine.vm(0, registers, exit_information);
    let result = handle_vmexit(manager, &mut vm);
    (result, vm.guest_registers)
}

fn install(machine: &mut Machine, manager: &HookManager<RecordingDefaultHandler>) -> GuestRegisters {
    let registers = GuestRegisters {
        rcx: 0xC1,
        rdx: READ_PAGE_VA,
        r8: EXEC_PAGE_VA,
        rip: GUEST_RIP,
        ..Default::default()
    };
    exit(machine, manager, registers, instruction_exit(18, 3)).1
}

fn frame(pa: u64) -> PhysicalAddress {
    PhysicalAddress::from_pa(pa)
}

#[test]
fn test_hook_lifecycle() {
    let mut machine = Machine::new();
    let manager = HookManager::new(RecordingDefaultHandler::default());
    let original = machine.ept_entry(EXEC_FRAME);

    // Install.
    let registers = install(&mut machine, &manager);
    assert_eq!(registers.rax, CommandStatus::Success.to_u64());
    assert_eq!(registers.rip, GUEST_RIP + 3);
    assert_eq!(
        manager.hook_state(0),
        Ok(Some(HookState {
            read_frame: frame(READ_FRAME),
            exec_frame: frame(EXEC_FRAME),
        }))
    );
    let entry = machine.ept_entry(EXEC_FRAME);
    assert_eq!((entry.host_pa(), entry.access_type()), (frame(EXEC_FRAME), AccessType::EXECUTE));

    // A data write sees the read frame.
    let (result, registers) = exit(&mut machine, &manager, GuestRegisters { rip: GUEST_RIP, ..Default::default() }, ept_violation_exit(EXEC_FRAME + 8, 0x1a2));
    assert_eq!(result, Ok(ExitType::Continue));
    assert_eq!(registers.rip, GUEST_RIP);
    let entry = machine.ept_entry(EXEC_FRAME);
    assert_eq!((entry.host_pa(), entry.access_type()), (frame(READ_FRAME), AccessType::READ_WRITE));

    // Executing from it again sees the exec frame.
    let (result, _) = exit(&mut machine, &manager, GuestRegisters::default(), ept_violation_exit(EXEC_FRAME, 0x19c));
    assert_eq!(result, Ok(ExitType::Continue));
    let entry = machine.ept_entry(EXEC_FRAME);
    assert_eq!((entry.host_pa(), entry.access_type()), (frame(EXEC_FRAME), AccessType::EXECUTE));

    // Uninstall.
    let flushes = machine.tlb.flushes();
    let (result, registers) = exit(&mut machine, &manager, GuestRegisters { rcx: 0xC2, ..Default::default() }, instruction_exit(18, 3));
    assert_eq!(result, Ok(ExitType::IncrementRIP));
    assert_eq!(registers.rax, CommandStatus::Success.to_u64());
    assert_eq!(machine.ept_entry(EXEC_FRAME), original);
    assert_eq!(machine.tlb.flushes(), flushes + 1);
    assert_eq!(manager.default_handler().vmcall_calls.get(), 0);
}

#[test]
fn test_reinstall_overwrites_both_frames() {
    let mut machine = Machine::new();
    let manager = HookManager::new(RecordingDefaultHandler::default());
    install(&mut machine, &manager);

    machine.address_space.map(GUEST_CR3, 0x6000_0000, 0x3000);
    machine.address_space.map(GUEST_CR3, 0x6000_1000, 0x4000);
    let registers = GuestRegisters {
        rcx: 0xC1,
        rdx: 0x6000_0000,
        r8: 0x6000_1000,
        ..Default::default()
    };
    exit(&mut machine, &manager, registers, instruction_exit(18, 3));

    assert_eq!(
        manager.hook_state(0),
        Ok(Some(HookState {
            read_frame: frame(0x3000),
            exec_frame: frame(0x4000),
        }))
    );
}

#[test]
fn test_probe_and_passthrough_cpuid() {
    let mut machine = Machine::new();
    let manager = HookManager::new(RecordingDefaultHandler::default());

    let probe = GuestRegisters {
        rax: CPUID_PROBE_LEAF as u64,
        rip: GUEST_RIP,
        ..Default::default()
    };
    let (result, registers) = exit(&mut machine, &manager, probe, instruction_exit(10, 2));
    assert_eq!(result, Ok(ExitType::IncrementRIP));
    assert_eq!(registers.rip, GUEST_RIP + 2);
    assert_eq!(registers.rax, signature_registers()[0] as u64);

    let (_, registers) = exit(&mut machine, &manager, GuestRegisters { rax: 0, ..Default::default() }, instruction_exit(10, 2));
    assert_eq!([registers.rax, registers.rbx, registers.rcx, registers.rdx], RecordingDefaultHandler::CPUID_ANSWER);
    assert_eq!(manager.default_handler().cpuid_calls.get(), 1);
}

#[test]
fn test_unknown_hypercall_keeps_rip() {
    let mut machine = Machine::new();
    let manager = HookManager::new(RecordingDefaultHandler::default());

    let registers = GuestRegisters {
        rcx: 0xdead,
        rip: GUEST_RIP,
        ..Default::default()
    };
    let (result, registers) = exit(&mut machine, &manager, registers, instruction_exit(18, 3));

    assert_eq!(result, Ok(ExitType::Continue));
    assert_eq!(registers.rip, GUEST_RIP);
    assert_eq!(manager.default_handler().vmcall_calls.get(), 1);
}

#[test]
fn test_unhandled_exit_reason() {
    let mut machine = Machine::new();
    let manager = HookManager::new(RecordingDefaultHandler::default());

    let (result, _) = exit(&mut machine, &manager, GuestRegisters::default(), instruction_exit(30, 1));

    assert_eq!(result, Err(HypervisorError::UnhandledVmExit));
}

#[test]
fn test_hooks_are_per_processor() {
    let mut machine = Machine::new();
    let manager = HookManager::new(RecordingDefaultHandler::default());
    install(&mut machine, &manager);

    let installed = machine.ept_entry(EXEC_FRAME);
    let flushes = machine.tlb.flushes();
    let registers = GuestRegisters {
        rip: GUEST_RIP,
        rax: 0x55,
        ..Default::default()
    };

    let mut vm = machine.vm(1, registers, ept_violation_exit(EXEC_FRAME, 0x1a1));
    assert_eq!(handle_vmexit(&manager, &mut vm), Err(HypervisorError::HookStateNotFound));
    assert_eq!(vm.guest_registers, registers);
    assert_eq!(manager.hook_state(1), Ok(None));

    // The failed exit leaves the shared EPT as the installing processor left it.
    assert_eq!(machine.ept_entry(EXEC_FRAME), installed);
    assert_eq!(machine.tlb.flushes(), flushes);
}
