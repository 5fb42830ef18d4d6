//! End-to-end interpreter tests
//!
//! Builds validated module structures in code and drives them through the
//! public executor surface.

mod common;

use common::{const_expr_i32, instantiate, invoke, ModuleBuilder};
use kiln::ast::instruction::{BlockType, Catch, CatchKind, MemArg};
use kiln::ast::types::{
    CompositeType, FieldType, HeapType, RefType, StorageType, SubType, ValueType,
};
use kiln::ast::Instruction::{self, *};
use kiln::executor::Executor;
use kiln::runtime::{Trap, Value};

#[test]
fn test_factorial() {
    // fac(n) = n == 0 ? 1 : n * fac(n - 1)
    let mut b = ModuleBuilder::new();
    let ty = b.add_type(vec![ValueType::I64], vec![ValueType::I64]);
    let fac = b.add_func(
        ty,
        vec![],
        vec![
            LocalGet { idx: 0 },
            I64Eqz,
            If {
                ty: BlockType::Value(ValueType::I64),
            },
            I64Const { value: 1 },
            Else,
            LocalGet { idx: 0 },
            LocalGet { idx: 0 },
            I64Const { value: 1 },
            I64Sub,
            Call { func_idx: 0 },
            I64Mul,
            End,
            End,
        ],
    );
    b.export_func("fac", fac);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    assert_eq!(
        invoke(&executor, &instance, "fac", &[Value::I64(5)]).unwrap(),
        vec![Value::I64(120)]
    );
    assert_eq!(
        invoke(&executor, &instance, "fac", &[Value::I64(0)]).unwrap(),
        vec![Value::I64(1)]
    );
}

#[test]
fn test_divide_by_zero_traps_with_stack_trace() {
    let mut b = ModuleBuilder::new();
    let ty = b.add_type(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]);
    let div = b.add_func(
        ty,
        vec![],
        vec![LocalGet { idx: 0 }, LocalGet { idx: 1 }, I32DivS, End],
    );
    b.export_func("div", div);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    assert_eq!(
        invoke(&executor, &instance, "div", &[Value::I32(10), Value::I32(0)]),
        Err(Trap::IntegerDivByZero)
    );
    // The faulting function appears at depth 0 of the recorded trace.
    assert_eq!(Executor::last_stack_trace(), vec![div]);

    assert_eq!(
        invoke(&executor, &instance, "div", &[Value::I32(10), Value::I32(3)]).unwrap(),
        vec![Value::I32(3)]
    );
}

#[test]
fn test_memory_store_at_page_boundary() {
    let mut b = ModuleBuilder::new();
    b.add_memory(1, None);
    let ty = b.add_type(vec![ValueType::I32], vec![]);
    let store_fn = b.add_func(
        ty,
        vec![],
        vec![
            LocalGet { idx: 0 },
            I32Const { value: 7 },
            I32Store {
                memarg: MemArg::new(2, 0),
            },
            End,
        ],
    );
    b.export_func("store", store_fn);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    assert_eq!(
        invoke(&executor, &instance, "store", &[Value::I32(65534)]),
        Err(Trap::OutOfBoundsMemAccess)
    );
    assert!(invoke(&executor, &instance, "store", &[Value::I32(65532)]).is_ok());
}

#[test]
fn test_memory_grow_and_size() {
    let build = |max: Option<u32>| {
        let mut b = ModuleBuilder::new();
        b.add_memory(1, max);
        let grow_ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
        let grow = b.add_func(
            grow_ty,
            vec![],
            vec![LocalGet { idx: 0 }, MemoryGrow { memory: 0 }, End],
        );
        let size_ty = b.add_type(vec![], vec![ValueType::I32]);
        let size = b.add_func(size_ty, vec![], vec![MemorySize { memory: 0 }, End]);
        b.export_func("grow", grow);
        b.export_func("size", size);
        b.build()
    };

    // Unbounded declaration: grow 2 returns the previous size 1.
    let (executor, _store, instance) = instantiate(&build(None));
    assert_eq!(
        invoke(&executor, &instance, "grow", &[Value::I32(2)]).unwrap(),
        vec![Value::I32(1)]
    );
    assert_eq!(invoke(&executor, &instance, "size", &[]).unwrap(), vec![Value::I32(3)]);

    // max = 2: growing by 2 fails with -1 and the size is unchanged.
    let (executor, _store, instance) = instantiate(&build(Some(2)));
    assert_eq!(
        invoke(&executor, &instance, "grow", &[Value::I32(2)]).unwrap(),
        vec![Value::I32(-1)]
    );
    assert_eq!(invoke(&executor, &instance, "size", &[]).unwrap(), vec![Value::I32(1)]);
}

#[test]
fn test_block_branching_and_loop() {
    // Sums 1..=n with a loop and a conditional exit branch.
    let mut b = ModuleBuilder::new();
    let ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
    let sum = b.add_func(
        ty,
        vec![(2, ValueType::I32)], // locals: i, acc
        vec![
            Block { ty: BlockType::Empty },
            Loop { ty: BlockType::Empty },
            // if i >= n, exit
            LocalGet { idx: 1 },
            LocalGet { idx: 0 },
            I32GeS,
            BrIf { depth: 1 },
            // i += 1; acc += i
            LocalGet { idx: 1 },
            I32Const { value: 1 },
            I32Add,
            LocalTee { idx: 1 },
            LocalGet { idx: 2 },
            I32Add,
            LocalSet { idx: 2 },
            Br { depth: 0 },
            End,
            End,
            LocalGet { idx: 2 },
            End,
        ],
    );
    b.export_func("sum", sum);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    assert_eq!(
        invoke(&executor, &instance, "sum", &[Value::I32(10)]).unwrap(),
        vec![Value::I32(55)]
    );
    assert_eq!(
        invoke(&executor, &instance, "sum", &[Value::I32(0)]).unwrap(),
        vec![Value::I32(0)]
    );
}

#[test]
fn test_br_table() {
    let mut b = ModuleBuilder::new();
    let ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
    let pick = b.add_func(
        ty,
        vec![],
        vec![
            Block { ty: BlockType::Empty },
            Block { ty: BlockType::Empty },
            Block { ty: BlockType::Empty },
            LocalGet { idx: 0 },
            BrTable {
                targets: vec![0, 1],
                default: 2,
            },
            End,
            I32Const { value: 100 },
            Return,
            End,
            I32Const { value: 200 },
            Return,
            End,
            I32Const { value: 300 },
            End,
        ],
    );
    b.export_func("pick", pick);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    for (input, expected) in [(0, 100), (1, 200), (2, 300), (99, 300)] {
        assert_eq!(
            invoke(&executor, &instance, "pick", &[Value::I32(input)]).unwrap(),
            vec![Value::I32(expected)]
        );
    }
}

#[test]
fn test_call_indirect() {
    let mut b = ModuleBuilder::new();
    let binop = b.add_type(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]);
    let other = b.add_type(vec![], vec![]);
    let add = b.add_func(
        binop,
        vec![],
        vec![LocalGet { idx: 0 }, LocalGet { idx: 1 }, I32Add, End],
    );
    let sub = b.add_func(
        binop,
        vec![],
        vec![LocalGet { idx: 0 }, LocalGet { idx: 1 }, I32Sub, End],
    );
    let nop = b.add_func(other, vec![], vec![End]);
    b.add_table(RefType::funcref(), 4, None);
    b.active_elem(0, const_expr_i32(0), &[add, sub, nop]);

    let disp_ty = b.add_type(
        vec![ValueType::I32, ValueType::I32, ValueType::I32],
        vec![ValueType::I32],
    );
    let dispatch = b.add_func(
        disp_ty,
        vec![],
        vec![
            LocalGet { idx: 1 },
            LocalGet { idx: 2 },
            LocalGet { idx: 0 },
            CallIndirect {
                type_idx: binop,
                table_idx: 0,
            },
            End,
        ],
    );
    b.export_func("dispatch", dispatch);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    let args = |slot| [Value::I32(slot), Value::I32(7), Value::I32(3)];

    assert_eq!(
        invoke(&executor, &instance, "dispatch", &args(0)).unwrap(),
        vec![Value::I32(10)]
    );
    assert_eq!(
        invoke(&executor, &instance, "dispatch", &args(1)).unwrap(),
        vec![Value::I32(4)]
    );
    // Signature mismatch
    assert_eq!(
        invoke(&executor, &instance, "dispatch", &args(2)),
        Err(Trap::IndirectCallTypeMismatch)
    );
    // Uninitialized slot
    assert_eq!(
        invoke(&executor, &instance, "dispatch", &args(3)),
        Err(Trap::UninitializedElement)
    );
    // Out-of-bounds slot
    assert_eq!(
        invoke(&executor, &instance, "dispatch", &args(4)),
        Err(Trap::UndefinedElement)
    );
}

#[test]
fn test_tail_call_does_not_grow_stack() {
    // Tail-recursive countdown far deeper than the call-depth limit.
    let mut b = ModuleBuilder::new();
    let ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
    let count = b.add_func(
        ty,
        vec![],
        vec![
            LocalGet { idx: 0 },
            I32Eqz,
            If {
                ty: BlockType::Value(ValueType::I32),
            },
            I32Const { value: 42 },
            Else,
            LocalGet { idx: 0 },
            I32Const { value: 1 },
            I32Sub,
            ReturnCall { func_idx: 0 },
            End,
            End,
        ],
    );
    b.export_func("count", count);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    assert_eq!(
        invoke(&executor, &instance, "count", &[Value::I32(100_000)]).unwrap(),
        vec![Value::I32(42)]
    );
}

#[test]
fn test_deep_recursion_exhausts_call_stack() {
    let mut b = ModuleBuilder::new();
    let ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
    let down = b.add_func(
        ty,
        vec![],
        vec![
            LocalGet { idx: 0 },
            I32Eqz,
            If {
                ty: BlockType::Value(ValueType::I32),
            },
            I32Const { value: 0 },
            Else,
            LocalGet { idx: 0 },
            I32Const { value: 1 },
            I32Sub,
            Call { func_idx: 0 },
            End,
            End,
        ],
    );
    b.export_func("down", down);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    assert_eq!(
        invoke(&executor, &instance, "down", &[Value::I32(100_000)]),
        Err(Trap::CallStackExhausted)
    );
}

#[test]
fn test_globals_and_mutation() {
    let mut b = ModuleBuilder::new();
    b.add_global(ValueType::I32, true, const_expr_i32(10));
    let ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
    let bump = b.add_func(
        ty,
        vec![],
        vec![
            GlobalGet { idx: 0 },
            LocalGet { idx: 0 },
            I32Add,
            GlobalSet { idx: 0 },
            GlobalGet { idx: 0 },
            End,
        ],
    );
    b.export_func("bump", bump);
    b.export_global("counter", 0);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    assert_eq!(
        invoke(&executor, &instance, "bump", &[Value::I32(5)]).unwrap(),
        vec![Value::I32(15)]
    );
    assert_eq!(
        invoke(&executor, &instance, "bump", &[Value::I32(1)]).unwrap(),
        vec![Value::I32(16)]
    );
}

#[test]
fn test_gc_array_out_of_bounds() {
    // array.new with length 3, then array.get at index 3 traps.
    let mut b = ModuleBuilder::new();
    let array_ty = b.add_sub_type(SubType::from_composite(CompositeType::Array(FieldType::new(
        StorageType::Val(ValueType::I32),
        true,
    ))));
    let ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
    let probe = b.add_func(
        ty,
        vec![(1, ValueType::Ref(RefType::new(true, HeapType::Array)))],
        vec![
            I32Const { value: 9 },
            I32Const { value: 3 },
            ArrayNew { type_idx: array_ty },
            LocalSet { idx: 1 },
            LocalGet { idx: 1 },
            LocalGet { idx: 0 },
            ArrayGet { type_idx: array_ty },
            End,
        ],
    );
    b.export_func("probe", probe);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    assert_eq!(
        invoke(&executor, &instance, "probe", &[Value::I32(2)]).unwrap(),
        vec![Value::I32(9)]
    );
    assert_eq!(
        invoke(&executor, &instance, "probe", &[Value::I32(3)]),
        Err(Trap::OutOfBoundsArrayAccess)
    );
}

#[test]
fn test_gc_struct_and_ref_test() {
    let mut b = ModuleBuilder::new();
    let struct_ty = b.add_sub_type(SubType::from_composite(CompositeType::Struct(vec![
        FieldType::new(StorageType::I8, true),
        FieldType::new(StorageType::Val(ValueType::I64), false),
    ])));
    let ty = b.add_type(vec![], vec![ValueType::I32, ValueType::I32]);
    // Builds a struct with a packed field, reads it back signed, and
    // tests the reference against the struct hierarchy.
    let probe = b.add_func(
        ty,
        vec![(1, ValueType::Ref(RefType::new(true, HeapType::Struct)))],
        vec![
            I32Const { value: 0x1FF },
            I64Const { value: 5 },
            StructNew { type_idx: struct_ty },
            LocalTee { idx: 0 },
            StructGetS {
                type_idx: struct_ty,
                field: 0,
            },
            LocalGet { idx: 0 },
            RefTest {
                ty: RefType::new(false, HeapType::Struct),
            },
            End,
        ],
    );
    b.export_func("probe", probe);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    let results = invoke(&executor, &instance, "probe", &[]).unwrap();
    // 0x1FF packed into i8 reads back as -1; the ref.test reports 1.
    assert_eq!(results, vec![Value::I32(-1), Value::I32(1)]);
}

#[test]
fn test_exception_caught_by_matching_tag() {
    let mut b = ModuleBuilder::new();
    let tag_sig = b.add_type(vec![ValueType::I32], vec![]);
    let tag = b.add_tag(tag_sig);
    let ty = b.add_type(vec![], vec![ValueType::I32]);
    let catcher = b.add_func(
        ty,
        vec![],
        vec![
            Block {
                ty: BlockType::Value(ValueType::I32),
            },
            TryTable {
                ty: BlockType::Empty,
                catches: vec![Catch {
                    kind: CatchKind::Tag { tag_idx: tag },
                    label: 0,
                }],
            },
            I32Const { value: 42 },
            Throw { tag_idx: tag },
            End,
            I32Const { value: 0 },
            End,
            End,
        ],
    );
    b.export_func("catcher", catcher);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    // The handler receives the thrown payload.
    assert_eq!(
        invoke(&executor, &instance, "catcher", &[]).unwrap(),
        vec![Value::I32(42)]
    );
}

#[test]
fn test_exception_propagates_across_frames() {
    let mut b = ModuleBuilder::new();
    let tag_sig = b.add_type(vec![], vec![]);
    let tag = b.add_tag(tag_sig);
    let void = b.add_type(vec![], vec![]);
    let thrower = b.add_func(void, vec![], vec![Throw { tag_idx: tag }, End]);
    let ty = b.add_type(vec![], vec![ValueType::I32]);
    let catcher = b.add_func(
        ty,
        vec![],
        vec![
            Block { ty: BlockType::Empty },
            TryTable {
                ty: BlockType::Empty,
                catches: vec![Catch {
                    kind: CatchKind::All,
                    label: 0,
                }],
            },
            Call { func_idx: thrower },
            End,
            End,
            I32Const { value: 7 },
            End,
        ],
    );
    b.export_func("catcher", catcher);
    let uncaught = b.add_func(ty, vec![], vec![Call { func_idx: thrower }, I32Const { value: 1 }, End]);
    b.export_func("uncaught", uncaught);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    assert_eq!(
        invoke(&executor, &instance, "catcher", &[]).unwrap(),
        vec![Value::I32(7)]
    );
    assert_eq!(
        invoke(&executor, &instance, "uncaught", &[]),
        Err(Trap::UncaughtException)
    );
}

#[test]
fn test_unreachable_traps() {
    let mut b = ModuleBuilder::new();
    let ty = b.add_type(vec![], vec![]);
    let f = b.add_func(ty, vec![], vec![Instruction::Unreachable, End]);
    b.export_func("f", f);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    assert_eq!(invoke(&executor, &instance, "f", &[]), Err(Trap::Unreachable));
}

#[test]
fn test_select_and_parametric() {
    let mut b = ModuleBuilder::new();
    let ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
    let choose = b.add_func(
        ty,
        vec![],
        vec![
            I32Const { value: 100 },
            I32Const { value: 200 },
            LocalGet { idx: 0 },
            Select,
            End,
        ],
    );
    b.export_func("choose", choose);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    assert_eq!(
        invoke(&executor, &instance, "choose", &[Value::I32(1)]).unwrap(),
        vec![Value::I32(100)]
    );
    assert_eq!(
        invoke(&executor, &instance, "choose", &[Value::I32(0)]).unwrap(),
        vec![Value::I32(200)]
    );
}

#[test]
fn test_determinism_of_pure_function() {
    // Same inputs, same outputs, twice in a row (no shared memory, no
    // host nondeterminism involved).
    let mut b = ModuleBuilder::new();
    let ty = b.add_type(vec![ValueType::F64], vec![ValueType::F64]);
    let f = b.add_func(
        ty,
        vec![],
        vec![
            LocalGet { idx: 0 },
            F64Sqrt,
            LocalGet { idx: 0 },
            F64Mul,
            F64Nearest,
            End,
        ],
    );
    b.export_func("f", f);
    let module = b.build();

    let (executor, _store, instance) = instantiate(&module);
    let first = invoke(&executor, &instance, "f", &[Value::F64(17.25)]).unwrap();
    let second = invoke(&executor, &instance, "f", &[Value::F64(17.25)]).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_instruction_budget() {
    let mut b = ModuleBuilder::new();
    let ty = b.add_type(vec![], vec![]);
    let spin = b.add_func(
        ty,
        vec![],
        vec![Loop { ty: BlockType::Empty }, Br { depth: 0 }, End, End],
    );
    b.export_func("spin", spin);
    let module = b.build();

    let executor = std::sync::Arc::new(Executor::new(kiln::executor::Config {
        instruction_limit: Some(10_000),
        ..kiln::executor::Config::default()
    }));
    let mut store = kiln::runtime::Store::new();
    let instance = executor.instantiate_module(&mut store, &module).unwrap();
    assert_eq!(
        invoke(&executor, &instance, "spin", &[]),
        Err(Trap::CostLimitExceeded)
    );
}
