//! Integration tests: virtual cores, segment lock and native modules

use std::sync::Arc;

use regvm_core::prelude::*;
use regvm_core::vm::CoreStatus;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn run(b: &CodeBuilder, config: VmConfig) -> (Machine, RunReport) {
    init_tracing();
    let mut machine = Machine::new(b.build().unwrap(), config).unwrap();
    let report = machine.run();
    (machine, report)
}

/// Worker body: counter += 1 under the segment lock, then thread exit
fn emit_locked_increment(b: &mut CodeBuilder, counter: i64) {
    b.label("worker")
        .intr1(2, 0, 0, 0)
        .load_abs(Opcode::Loada, counter, 0, 1)
        .loadl(1, 2)
        .op(Opcode::Addi, 1, 2, 1)
        .loadl(counter, 3)
        .loadl(0, 4)
        .op(Opcode::Pullqw, 1, 3, 4)
        .intr1(3, 0, 0, 0)
        .loadl(0, 0)
        .intr1(255, 0, 0, 0);
}

#[test]
fn test_spawned_cores_increment_shared_counter() {
    const WORKERS: usize = 6;

    let mut b = CodeBuilder::new();
    let counter = b.global_zeroed(8);
    b.loadl_label("worker", 10);
    for _ in 0..WORKERS {
        b.intr1(0, 10, 0, 0);
    }
    b.intr1(1, 0, 0, 0)
        .load_abs(Opcode::Loada, counter, 0, 1)
        .intr0(255, 1, 0, 0);
    emit_locked_increment(&mut b, counter);

    let config = VmConfig::default()
        .with_max_cores(WORKERS + 1)
        .with_stack_size(256);
    let (machine, report) = run(&b, config);
    assert!(report.is_ok(), "{:?}", report.error);
    assert_eq!(report.return_code, WORKERS as i64);
    for core in 1..=WORKERS {
        assert_eq!(machine.core_status(core), Some(CoreStatus::Stop));
    }
}

#[test]
fn test_finished_cores_are_reused() {
    // Two slots, five sequential spawn/join rounds
    let mut b = CodeBuilder::new();
    let counter = b.global_zeroed(8);
    b.loadl_label("worker", 10).loadl(0, 20).loadl(5, 21);
    b.label("round")
        .intr1(0, 10, 0, 0)
        .intr1(1, 0, 0, 0)
        .inclsijmpi(20, 21, "round")
        .load_abs(Opcode::Loada, counter, 0, 1)
        .intr0(255, 1, 0, 0);
    emit_locked_increment(&mut b, counter);

    let (_, report) = run(&b, VmConfig::default().with_max_cores(2));
    assert!(report.is_ok(), "{:?}", report.error);
    assert_eq!(report.return_code, 5);
}

#[test]
fn test_child_inherits_live_stack() {
    let mut b = CodeBuilder::new();
    let out = b.global_zeroed(16);
    b.loadl(7, 1)
        .loadl(35, 2)
        .stack(Opcode::Stpushi, 1)
        .stack(Opcode::Stpushi, 2)
        .loadl_label("child", 10)
        .intr1(0, 10, 0, 0)
        .intr1(1, 0, 0, 0)
        // parent stack is untouched by the child's pops
        .stack(Opcode::Stpopi, 3)
        .stack(Opcode::Stpopi, 4)
        .op(Opcode::Addi, 3, 4, 5)
        .load_abs(Opcode::Loada, out, 0, 6)
        .op(Opcode::Addi, 5, 6, 5)
        .intr0(255, 5, 0, 0);
    b.label("child")
        .stack(Opcode::Stpopi, 1)
        .stack(Opcode::Stpopi, 2)
        .op(Opcode::Subi, 1, 2, 3)
        .loadl(out, 4)
        .loadl(0, 5)
        .op(Opcode::Pullqw, 3, 4, 5)
        .intr1(4, 6, 0, 0)
        .loadl(8, 5)
        .op(Opcode::Pullqw, 6, 4, 5)
        .intr1(255, 0, 0, 0);

    let (machine, report) = run(&b, VmConfig::default().with_max_cores(2).with_stack_size(128));
    assert!(report.is_ok(), "{:?}", report.error);
    // child: 35 - 7 = 28, parent: 35 + 7 + 28
    assert_eq!(report.return_code, 70);
    // child saw its own index
    assert_eq!(machine.data().read_i64(8).unwrap(), 1);
}

#[test]
fn test_spawn_without_free_core_is_fatal() {
    let mut b = CodeBuilder::new();
    b.loadl_label("idle", 10).intr1(0, 10, 0, 0).intr0(255, 0, 0, 0);
    b.label("idle").intr1(255, 0, 0, 0);

    let (_, report) = run(&b, VmConfig::default().with_max_cores(1));
    assert_eq!(report.return_code, 1);
    assert!(matches!(report.error, Some(VmError::NoFreeCore(1))));
}

#[test]
fn test_lock_released_when_holder_ends() {
    let mut b = CodeBuilder::new();
    b.loadl_label("holder", 10)
        .intr1(0, 10, 0, 0)
        .intr1(1, 0, 0, 0)
        .intr1(2, 0, 0, 0)
        .intr1(3, 0, 0, 0)
        .loadl(0, 0)
        .intr0(255, 0, 0, 0);
    // Takes the lock and dies on a bad stack pop
    b.label("holder").intr1(2, 0, 0, 0).stack(Opcode::Stpopi, 1);

    let (_, report) = run(&b, VmConfig::default().with_max_cores(2));
    assert!(report.is_ok(), "{:?}", report.error);
    assert_eq!(report.return_code, 0);
}

#[test]
fn test_child_fault_does_not_end_primary() {
    let mut b = CodeBuilder::new();
    b.loadl_label("bad", 10)
        .intr1(0, 10, 0, 0)
        .intr1(1, 0, 0, 0)
        .loadl(4, 1)
        .intr0(255, 1, 0, 0);
    b.label("bad").loadl(1, 1).loadl(0, 2).op(Opcode::Divi, 1, 2, 3);

    let (_, report) = run(&b, VmConfig::default().with_max_cores(2).with_division_check(true));
    assert!(report.is_ok());
    assert_eq!(report.return_code, 4);
}

// ═══════════════════════════════════════════════════════════════════
// NATIVE MODULES
// ═══════════════════════════════════════════════════════════════════

unsafe extern "C" fn add(sp: *mut u8, top: *mut u8, bottom: *mut u8, _data: *mut u8) -> *mut u8 {
    let mut stack = unsafe { StackView::new(sp, top, bottom) };
    let (Some(b), Some(a)) = (stack.pop_i64(), stack.pop_i64()) else {
        return std::ptr::null_mut();
    };
    match stack.push_i64(a + b) {
        Some(()) => stack.sp(),
        None => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn broken(
    _sp: *mut u8,
    _top: *mut u8,
    _bottom: *mut u8,
    _data: *mut u8,
) -> *mut u8 {
    std::ptr::null_mut()
}

fn module_program(function: &str) -> CodeBuilder {
    let mut b = CodeBuilder::new();
    let module = b.global_cstr("math");
    let symbol = b.global_cstr(function);
    b.loadl(module, 1)
        .loadl(2, 2) // module slot
        .intr0(0, 1, 2, 0)
        .loadl(symbol, 3)
        .loadl(0, 4) // function slot
        .intr0(2, 2, 4, 3)
        .loadl(5, 5)
        .loadl(7, 6)
        .stack(Opcode::Stpushi, 5)
        .stack(Opcode::Stpushi, 6)
        .intr0(3, 2, 4, 0)
        .stack(Opcode::Stpopi, 7)
        .intr0(1, 2, 0, 0)
        .intr0(255, 7, 0, 0);
    b
}

fn math_machine(b: &CodeBuilder) -> Machine {
    init_tracing();
    let mut machine = Machine::new(b.build().unwrap(), VmConfig::default().with_max_cores(1)).unwrap();
    machine.register_builtin(
        BuiltinModule::new("math")
            .with_function("add", add)
            .with_function("broken", broken),
    );
    machine
}

#[test]
fn test_native_call_through_stack_abi() {
    let mut machine = math_machine(&module_program("add"));
    let report = machine.run();
    assert!(report.is_ok(), "{:?}", report.error);
    assert_eq!(report.return_code, 12);
}

#[test]
fn test_null_native_return_is_stack_corruption() {
    let mut machine = math_machine(&module_program("broken"));
    let report = machine.run();
    assert!(matches!(report.error, Some(VmError::StackCorrupted { sp: None, .. })));
}

#[test]
fn test_bind_unknown_symbol_is_fatal() {
    let mut machine = math_machine(&module_program("mul"));
    let report = machine.run();
    assert!(matches!(report.error, Some(VmError::ModuleBind { .. })));
}

#[test]
fn test_preloaded_module_occupies_slot() {
    let mut machine = math_machine(&module_program("add"));
    assert_eq!(machine.preload_module("math").unwrap(), 0);
    assert_eq!(machine.preload_module("math").unwrap(), 1);
    // program loads into slot 2, still free
    assert_eq!(machine.run().return_code, 12);

    let mut b = CodeBuilder::new();
    let name = b.global_cstr("math");
    b.loadl(name, 1).loadl(0, 2).intr0(0, 1, 2, 0).intr0(255, 0, 0, 0);
    let mut machine = math_machine(&b);
    machine.preload_module("math").unwrap();
    assert!(matches!(
        machine.run().error,
        Some(VmError::ModuleSlotInUse { slot: 0, .. })
    ));
}

#[test]
fn test_missing_library_is_fatal() {
    let mut b = CodeBuilder::new();
    let name = b.global_cstr("/nonexistent/libregvm-missing.so");
    b.loadl(name, 1).loadl(0, 2).intr0(0, 1, 2, 0).intr0(255, 0, 0, 0);
    let (_, report) = run(&b, VmConfig::default().with_max_cores(1));
    assert!(matches!(report.error, Some(VmError::ModuleLoad { .. })));
}

#[test]
fn test_console_shared_between_cores() {
    let mut b = CodeBuilder::new();
    b.loadl_label("child", 10)
        .intr1(0, 10, 0, 0)
        .intr1(1, 0, 0, 0)
        .loadl(2, 1)
        .intr0(4, 1, 0, 0)
        .intr0(255, 0, 0, 0);
    b.label("child").loadl(1, 1).intr0(4, 1, 0, 0).intr1(255, 0, 0, 0);

    let console = Arc::new(BufferConsole::new());
    let mut machine = Machine::new(b.build().unwrap(), VmConfig::default().with_max_cores(2))
        .unwrap()
        .with_console(console.clone());
    assert!(machine.run().is_ok());
    assert_eq!(console.output(), "12");
}

#[test]
fn test_free_empty_module_slot_continues() {
    let mut b = CodeBuilder::new();
    b.loadl(3, 1).intr0(1, 1, 0, 0).loadl(9, 2).intr0(255, 2, 0, 0);
    let (_, report) = run(&b, VmConfig::default().with_max_cores(1));
    assert!(report.is_ok(), "{:?}", report.error);
    assert_eq!(report.return_code, 9);
}

#[test]
fn test_spawn_while_holding_segment_lock() {
    // the child blocks on the lock until the parent releases it
    let mut b = CodeBuilder::new();
    let counter = b.global_zeroed(8);
    b.loadl_label("worker", 10)
        .intr1(2, 0, 0, 0)
        .intr1(0, 10, 0, 0)
        .loadl(40, 1)
        .loadl(counter, 3)
        .loadl(0, 4)
        .op(Opcode::Pullqw, 1, 3, 4)
        .intr1(3, 0, 0, 0)
        .intr1(1, 0, 0, 0)
        .load_abs(Opcode::Loada, counter, 0, 1)
        .intr0(255, 1, 0, 0);
    emit_locked_increment(&mut b, counter);

    let (_, report) = run(&b, VmConfig::default().with_max_cores(2));
    assert!(report.is_ok(), "{:?}", report.error);
    assert_eq!(report.return_code, 41);
}
