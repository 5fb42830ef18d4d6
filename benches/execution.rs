//! Execution benchmarks for the interpreter.
//!
//! These benchmarks measure instruction dispatch, call overhead, and
//! bulk memory throughput. Modules are built in code against the
//! validated AST, the same way the integration tests build theirs.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use kiln::ast::instruction::{BlockType, MemArg};
use kiln::ast::types::ValueType;
use kiln::ast::Instruction::*;
use kiln::ast::Module;
use kiln::executor::Executor;
use kiln::runtime::{ModuleInstance, Store, Value};
use std::hint::black_box;
use std::sync::Arc;

/// run(n): counts down to zero through a loop back-edge, returns n.
fn noop_loop_module() -> Module {
    let mut b = builder::ModuleBuilder::new();
    let ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
    let run = b.add_func(
        ty,
        vec![(1, ValueType::I32)],
        vec![
            LocalGet { idx: 0 },
            LocalSet { idx: 1 },
            Block { ty: BlockType::Empty },
            Loop { ty: BlockType::Empty },
            LocalGet { idx: 1 },
            I32Eqz,
            BrIf { depth: 1 },
            LocalGet { idx: 1 },
            I32Const { value: 1 },
            I32Sub,
            LocalSet { idx: 1 },
            Br { depth: 0 },
            End,
            End,
            LocalGet { idx: 0 },
            End,
        ],
    );
    b.export_func("run", run);
    b.build()
}

/// fib(n), iterative.
fn fib_iterative_module() -> Module {
    let mut b = builder::ModuleBuilder::new();
    let ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
    // locals: a, b, i, tmp
    let fib = b.add_func(
        ty,
        vec![(4, ValueType::I32)],
        vec![
            I32Const { value: 0 },
            LocalSet { idx: 1 },
            I32Const { value: 1 },
            LocalSet { idx: 2 },
            Block { ty: BlockType::Empty },
            Loop { ty: BlockType::Empty },
            LocalGet { idx: 3 },
            LocalGet { idx: 0 },
            I32GeS,
            BrIf { depth: 1 },
            LocalGet { idx: 1 },
            LocalGet { idx: 2 },
            I32Add,
            LocalSet { idx: 4 },
            LocalGet { idx: 2 },
            LocalSet { idx: 1 },
            LocalGet { idx: 4 },
            LocalSet { idx: 2 },
            LocalGet { idx: 3 },
            I32Const { value: 1 },
            I32Add,
            LocalSet { idx: 3 },
            Br { depth: 0 },
            End,
            End,
            LocalGet { idx: 1 },
            End,
        ],
    );
    b.export_func("fib", fib);
    b.build()
}

/// fib(n), recursive; measures call-frame churn.
fn fib_recursive_module() -> Module {
    let mut b = builder::ModuleBuilder::new();
    let ty = b.add_type(vec![ValueType::I32], vec![ValueType::I32]);
    let fib = b.add_func(
        ty,
        vec![],
        vec![
            LocalGet { idx: 0 },
            I32Const { value: 2 },
            I32LtS,
            If {
                ty: BlockType::Value(ValueType::I32),
            },
            LocalGet { idx: 0 },
            Else,
            LocalGet { idx: 0 },
            I32Const { value: 1 },
            I32Sub,
            Call { func_idx: 0 },
            LocalGet { idx: 0 },
            I32Const { value: 2 },
            I32Sub,
            Call { func_idx: 0 },
            I32Add,
            End,
            End,
        ],
    );
    b.export_func("fib", fib);
    b.build()
}

/// fill(dst, len): memory.fill driven from one export.
fn memfill_module() -> Module {
    let mut b = builder::ModuleBuilder::new();
    b.add_memory(4, None);
    let ty = b.add_type(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]);
    let fill = b.add_func(
        ty,
        vec![],
        vec![
            LocalGet { idx: 0 },
            I32Const { value: 0x42 },
            LocalGet { idx: 1 },
            MemoryFill { memory: 0 },
            LocalGet { idx: 0 },
            I32Load {
                memarg: MemArg::new(2, 0),
            },
            End,
        ],
    );
    b.export_func("fill", fill);
    b.build()
}

fn setup(module: &Module) -> (Arc<Executor>, Arc<ModuleInstance>) {
    let executor = Arc::new(Executor::default());
    let mut store = Store::new();
    let instance = executor
        .instantiate_module(&mut store, module)
        .expect("instantiation should succeed");
    (executor, instance)
}

fn run(executor: &Executor, instance: &Arc<ModuleInstance>, name: &str, args: &[Value]) -> Vec<Value> {
    let func = instance.exported_func(name).expect("export should exist");
    let types: Vec<ValueType> = func.ty().params.clone();
    executor
        .invoke(&func, args, &types)
        .expect("invocation should succeed")
        .into_iter()
        .map(|(v, _)| v)
        .collect()
}

/// Verify module correctness before benchmarking.
fn verify_modules() {
    let (ex, inst) = setup(&noop_loop_module());
    assert_eq!(run(&ex, &inst, "run", &[Value::I32(1000)]), vec![Value::I32(1000)]);

    let (ex, inst) = setup(&fib_iterative_module());
    for (n, expected) in [(0, 0), (1, 1), (10, 55), (20, 6765)] {
        assert_eq!(run(&ex, &inst, "fib", &[Value::I32(n)]), vec![Value::I32(expected)]);
    }

    let (ex, inst) = setup(&fib_recursive_module());
    for (n, expected) in [(0, 0), (1, 1), (10, 55), (20, 6765)] {
        assert_eq!(run(&ex, &inst, "fib", &[Value::I32(n)]), vec![Value::I32(expected)]);
    }

    let (ex, inst) = setup(&memfill_module());
    assert_eq!(
        run(&ex, &inst, "fill", &[Value::I32(64), Value::I32(1024)]),
        vec![Value::I32(0x42424242)]
    );
}

fn bench_dispatch(c: &mut Criterion) {
    verify_modules();

    let (ex, inst) = setup(&noop_loop_module());
    let mut group = c.benchmark_group("dispatch");
    for n in [1_000, 100_000] {
        group.bench_with_input(BenchmarkId::new("noop_loop", n), &n, |bench, &n| {
            bench.iter(|| black_box(run(&ex, &inst, "run", &[Value::I32(n)])));
        });
    }
    group.finish();
}

fn bench_calls(c: &mut Criterion) {
    let (iter_ex, iter_inst) = setup(&fib_iterative_module());
    let (rec_ex, rec_inst) = setup(&fib_recursive_module());

    let mut group = c.benchmark_group("fib");
    group.bench_function("iterative_30", |bench| {
        bench.iter(|| black_box(run(&iter_ex, &iter_inst, "fib", &[Value::I32(30)])));
    });
    group.bench_function("recursive_20", |bench| {
        bench.iter(|| black_box(run(&rec_ex, &rec_inst, "fib", &[Value::I32(20)])));
    });
    group.finish();
}

fn bench_memory(c: &mut Criterion) {
    let (ex, inst) = setup(&memfill_module());
    let mut group = c.benchmark_group("memory");
    for len in [1_024, 65_536] {
        group.bench_with_input(BenchmarkId::new("fill", len), &len, |bench, &len| {
            bench.iter(|| black_box(run(&ex, &inst, "fill", &[Value::I32(0), Value::I32(len)])));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_calls, bench_memory);
criterion_main!(benches);

/// Minimal module construction, mirroring the integration tests' helper.
mod builder {
    use kiln::ast::types::{Limits, MemoryType, SubType, ValueType};
    use kiln::ast::{Export, ExternalKind, FuncBody, Instruction, Module};

    #[derive(Default)]
    pub struct ModuleBuilder {
        module: Module,
    }

    impl ModuleBuilder {
        pub fn new() -> ModuleBuilder {
            ModuleBuilder::default()
        }

        pub fn add_type(&mut self, params: Vec<ValueType>, results: Vec<ValueType>) -> u32 {
            self.module.types.push(SubType::func(params, results));
            (self.module.types.len() - 1) as u32
        }

        pub fn add_func(&mut self, type_idx: u32, locals: Vec<(u32, ValueType)>, body: Vec<Instruction>) -> u32 {
            self.module.funcs.push(type_idx);
            self.module.code.push(FuncBody::new(locals, body));
            (self.module.funcs.len() - 1) as u32
        }

        pub fn add_memory(&mut self, min: u32, max: Option<u32>) -> u32 {
            self.module.memories.push(MemoryType {
                limits: Limits::new(min, max),
            });
            (self.module.memories.len() - 1) as u32
        }

        pub fn export_func(&mut self, name: &str, index: u32) {
            self.module.exports.push(Export::new(name, ExternalKind::Func, index));
        }

        pub fn build(self) -> Module {
            self.module
        }
    }
}
