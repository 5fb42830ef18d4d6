//! Atomic rendezvous and cancellation tests
//!
//! Multi-threaded wait/notify over a shared memory, plus cooperative
//! cancellation of a busy loop via `stop()`.

mod common;

use common::{invoke, ModuleBuilder};
use kiln::ast::instruction::{BlockType, MemArg};
use kiln::ast::types::ValueType;
use kiln::ast::Instruction::*;
use kiln::runtime::{Trap, Value};
use std::thread;
use std::time::Duration;

/// Module with a shared memory and exports over the rendezvous ops:
/// wait(addr, expected, timeout) -> i32, notify(addr, count) -> i32,
/// load(addr) -> i32, store(addr, value).
fn rendezvous_module() -> kiln::ast::Module {
    let mut b = ModuleBuilder::new();
    b.add_shared_memory(1, 1);

    let wait_ty = b.add_type(
        vec![ValueType::I32, ValueType::I32, ValueType::I64],
        vec![ValueType::I32],
    );
    let wait = b.add_func(
        wait_ty,
        vec![],
        vec![
            LocalGet { idx: 0 },
            LocalGet { idx: 1 },
            LocalGet { idx: 2 },
            MemoryAtomicWait32 {
                memarg: MemArg::new(2, 0),
            },
            End,
        ],
    );

    let notify_ty = b.add_type(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]);
    let notify = b.add_func(
        notify_ty,
        vec![],
        vec![
            LocalGet { idx: 0 },
            LocalGet { idx: 1 },
            MemoryAtomicNotify {
                memarg: MemArg::new(2, 0),
            },
            End,
        ],
    );

    let load_ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
    let load = b.add_func(
        load_ty,
        vec![],
        vec![
            LocalGet { idx: 0 },
            I32AtomicLoad {
                memarg: MemArg::new(2, 0),
            },
            End,
        ],
    );

    let store_ty = b.add_type(vec![ValueType::I32, ValueType::I32], vec![]);
    let store = b.add_func(
        store_ty,
        vec![],
        vec![
            LocalGet { idx: 0 },
            LocalGet { idx: 1 },
            I32AtomicStore {
                memarg: MemArg::new(2, 0),
            },
            End,
        ],
    );

    let add_ty = b.add_type(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]);
    let add = b.add_func(
        add_ty,
        vec![],
        vec![
            LocalGet { idx: 0 },
            LocalGet { idx: 1 },
            I32AtomicRmwAdd {
                memarg: MemArg::new(2, 0),
            },
            End,
        ],
    );

    b.export_func("wait", wait);
    b.export_func("notify", notify);
    b.export_func("load", load);
    b.export_func("store", store);
    b.export_func("add", add);
    b.build()
}

#[test]
fn test_wait_then_notify_wakes_thread() {
    let module = rendezvous_module();
    let (executor, _store, instance) = common::instantiate(&module);

    // Thread A waits forever on cell 0 holding 0.
    let a_executor = executor.clone();
    let a_instance = instance.clone();
    let waiter = thread::spawn(move || {
        invoke(
            &a_executor,
            &a_instance,
            "wait",
            &[Value::I32(0), Value::I32(0), Value::I64(-1)],
        )
    });

    // Thread B notifies once somebody is blocked.
    let woken = loop {
        let woken = invoke(&executor, &instance, "notify", &[Value::I32(0), Value::I32(1)])
            .unwrap()
            .remove(0);
        if woken != Value::I32(0) {
            break woken;
        }
        thread::yield_now();
    };
    assert_eq!(woken, Value::I32(1));
    // The waiter was woken (0), not timed out.
    assert_eq!(waiter.join().unwrap().unwrap(), vec![Value::I32(0)]);

    // A wait with a mismatched expectation returns 1 immediately.
    assert_eq!(
        invoke(
            &executor,
            &instance,
            "wait",
            &[Value::I32(0), Value::I32(1), Value::I64(-1)],
        )
        .unwrap(),
        vec![Value::I32(1)]
    );
}

#[test]
fn test_wait_timeout_returns_two() {
    let module = rendezvous_module();
    let (executor, _store, instance) = common::instantiate(&module);
    // 5ms timeout on a cell nobody notifies.
    assert_eq!(
        invoke(
            &executor,
            &instance,
            "wait",
            &[Value::I32(4), Value::I32(0), Value::I64(5_000_000)],
        )
        .unwrap(),
        vec![Value::I32(2)]
    );
}

#[test]
fn test_unaligned_atomic_traps() {
    let module = rendezvous_module();
    let (executor, _store, instance) = common::instantiate(&module);
    assert_eq!(
        invoke(&executor, &instance, "load", &[Value::I32(2)]),
        Err(Trap::Unaligned)
    );
}

#[test]
fn test_atomic_rmw_across_threads() {
    let module = rendezvous_module();
    let (executor, _store, instance) = common::instantiate(&module);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let executor = executor.clone();
        let instance = instance.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..1000 {
                invoke(&executor, &instance, "add", &[Value::I32(0), Value::I32(1)]).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(
        invoke(&executor, &instance, "load", &[Value::I32(0)]).unwrap(),
        vec![Value::I32(4000)]
    );
}

#[test]
fn test_stop_interrupts_busy_loop() {
    // (loop br 0): cancellation is observed at the loop back-edge.
    let mut b = ModuleBuilder::new();
    let ty = b.add_type(vec![], vec![]);
    let spin = b.add_func(
        ty,
        vec![],
        vec![Loop { ty: BlockType::Empty }, Br { depth: 0 }, End, End],
    );
    b.export_func("spin", spin);
    let module = b.build();

    let (executor, _store, instance) = common::instantiate(&module);
    let spin_func = instance.exported_func("spin").unwrap();
    let pending = executor.async_invoke(&spin_func, &[], &[]);

    thread::sleep(Duration::from_millis(10));
    executor.stop();
    assert_eq!(pending.wait(), Err(Trap::Interrupted));
}

#[test]
fn test_cancel_wakes_blocked_waiter() {
    let module = rendezvous_module();
    let (executor, _store, instance) = common::instantiate(&module);

    let wait_func = instance.exported_func("wait").unwrap();
    let pending = executor.async_invoke(
        &wait_func,
        &[Value::I32(0), Value::I32(0), Value::I64(-1)],
        &[ValueType::I32, ValueType::I32, ValueType::I64],
    );

    // Give the waiter time to block, then cancel.
    thread::sleep(Duration::from_millis(20));
    pending.cancel();
    assert_eq!(pending.wait(), Err(Trap::Interrupted));
}

#[test]
fn test_async_invoke_completes() {
    let mut b = ModuleBuilder::new();
    let ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
    let double = b.add_func(
        ty,
        vec![],
        vec![LocalGet { idx: 0 }, LocalGet { idx: 0 }, I32Add, End],
    );
    b.export_func("double", double);
    let module = b.build();

    let (executor, _store, instance) = common::instantiate(&module);
    let func = instance.exported_func("double").unwrap();
    let pending = executor.async_invoke(&func, &[Value::I32(21)], &[ValueType::I32]);

    // Poll first, then collect.
    let result = loop {
        if let Some(result) = pending.wait_for(Duration::from_millis(50)) {
            break result;
        }
    };
    let values: Vec<Value> = result.unwrap().into_iter().map(|(v, _)| v).collect();
    assert_eq!(values, vec![Value::I32(42)]);
}
