//! AOT intrinsics bridge tests
//!
//! Stands in for compiled code with native functions that re-enter the
//! runtime through the intrinsics table, exercising the thread-local
//! context, the proxy call path, and the sentinel error channel.

mod common;

use common::{invoke, ModuleBuilder};
use kiln::ast::types::ValueType;
use kiln::ast::Instruction::*;
use kiln::executor::aot::INTRINSICS;
use kiln::runtime::value::ValRaw;
use kiln::runtime::{Trap, Value};
use std::ffi::c_void;

/// "Compiled" add: forwards its arguments to interpreted function 0
/// through the call intrinsic, then doubles the result.
unsafe extern "C" fn compiled_double_add(_ctx: *mut c_void, args: *const ValRaw, rets: *mut ValRaw) -> i32 {
    let status = unsafe { (INTRINSICS.call)(0, args, rets) };
    if status != 0 {
        return status;
    }
    let sum = unsafe { *rets }
        .to_value(ValueType::I32)
        .and_then(|v| v.as_i32())
        .unwrap_or(0);
    unsafe { *rets = ValRaw::from_value(&Value::I32(sum * 2)).unwrap() };
    0
}

/// "Compiled" code that reports a division-by-zero trap through the trap
/// intrinsic and unwinds.
unsafe extern "C" fn compiled_trap(_ctx: *mut c_void, _args: *const ValRaw, _rets: *mut ValRaw) -> i32 {
    unsafe { (INTRINSICS.trap)(1) }
}

/// "Compiled" memory probe: grows memory by one page and returns the
/// previous size via the mem intrinsics.
unsafe extern "C" fn compiled_grow(_ctx: *mut c_void, _args: *const ValRaw, rets: *mut ValRaw) -> i32 {
    let prev = unsafe { (INTRINSICS.mem_grow)(0, 1) };
    if prev == u32::MAX {
        return unsafe { (INTRINSICS.trap)(4) };
    }
    unsafe { *rets = ValRaw::from_value(&Value::I32(prev as i32)).unwrap() };
    0
}

fn bridge_module() -> kiln::ast::Module {
    let mut b = ModuleBuilder::new();
    b.add_memory(1, None);
    let binop = b.add_type(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]);
    // Function 0: the interpreted add the compiled code calls back into.
    let add = b.add_func(
        binop,
        vec![],
        vec![LocalGet { idx: 0 }, LocalGet { idx: 1 }, I32Add, End],
    );
    // Functions with attached native entries. Their bytecode bodies are
    // placeholders that never run.
    let double_add = b.add_func(
        binop,
        vec![],
        vec![Unreachable, End],
    );
    let trap_ty = b.add_type(vec![], vec![]);
    let trapper = b.add_func(trap_ty, vec![], vec![Unreachable, End]);
    let grow_ty = b.add_type(vec![], vec![ValueType::I32]);
    let grower = b.add_func(grow_ty, vec![], vec![Unreachable, End]);

    b.export_func("add", add);
    b.export_func("double_add", double_add);
    b.export_func("trapper", trapper);
    b.export_func("grower", grower);
    b.build()
}

#[test]
fn test_compiled_function_calls_back_into_interpreter() {
    let module = bridge_module();
    let (executor, _store, instance) = common::instantiate(&module);

    let double_add = instance.exported_func("double_add").unwrap();
    double_add.attach_aot_symbol(compiled_double_add).unwrap();
    // A second attachment is rejected.
    assert!(double_add.attach_aot_symbol(compiled_double_add).is_err());

    assert_eq!(
        invoke(&executor, &instance, "double_add", &[Value::I32(2), Value::I32(3)]).unwrap(),
        vec![Value::I32(10)]
    );
}

#[test]
fn test_compiled_trap_propagates_through_error_slot() {
    let module = bridge_module();
    let (executor, _store, instance) = common::instantiate(&module);

    let trapper = instance.exported_func("trapper").unwrap();
    trapper.attach_aot_symbol(compiled_trap).unwrap();

    assert_eq!(
        invoke(&executor, &instance, "trapper", &[]),
        Err(Trap::IntegerDivByZero)
    );
}

#[test]
fn test_compiled_memory_intrinsics() {
    let module = bridge_module();
    let (executor, _store, instance) = common::instantiate(&module);

    let grower = instance.exported_func("grower").unwrap();
    grower.attach_aot_symbol(compiled_grow).unwrap();

    assert_eq!(
        invoke(&executor, &instance, "grower", &[]).unwrap(),
        vec![Value::I32(1)]
    );
    assert_eq!(
        invoke(&executor, &instance, "grower", &[]).unwrap(),
        vec![Value::I32(2)]
    );
    // The growth is visible to the instance.
    match instance.memory(0) {
        Some(mem) => assert_eq!(mem.size(), 3),
        None => panic!("memory should exist"),
    }
}

#[test]
fn test_interpreted_call_into_compiled_function() {
    // An interpreted wrapper that `call`s the compiled double_add.
    let mut b = ModuleBuilder::new();
    b.add_memory(1, None);
    let binop = b.add_type(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]);
    // Function 0 is the interpreted add the native entry forwards to.
    b.add_func(
        binop,
        vec![],
        vec![LocalGet { idx: 0 }, LocalGet { idx: 1 }, I32Add, End],
    );
    let double_add = b.add_func(binop, vec![], vec![Unreachable, End]);
    let wrapper = b.add_func(
        binop,
        vec![],
        vec![
            LocalGet { idx: 0 },
            LocalGet { idx: 1 },
            Call { func_idx: double_add },
            I32Const { value: 1 },
            I32Add,
            End,
        ],
    );
    b.export_func("wrapper", wrapper);
    b.export_func("double_add", double_add);
    let module = b.build();

    let (executor, _store, instance) = common::instantiate(&module);
    instance
        .exported_func("double_add")
        .unwrap()
        .attach_aot_symbol(compiled_double_add)
        .unwrap();

    // (4 + 5) * 2 + 1
    assert_eq!(
        invoke(&executor, &instance, "wrapper", &[Value::I32(4), Value::I32(5)]).unwrap(),
        vec![Value::I32(19)]
    );
}
