//! Component instantiation and canonical-ABI adaptor tests

mod common;

use common::ModuleBuilder;
use kiln::ast::component::{
    Alias, AliasTarget, Canon, CanonOpts, Component, ComponentExport, ComponentExportKind,
    ComponentFuncType, ComponentSection, CoreInstanceExpr, InterfaceType,
};
use kiln::ast::types::ValueType;
use kiln::ast::Instruction::*;
use kiln::executor::Executor;
use kiln::runtime::component::InterfaceValue;
use kiln::runtime::{Store, Trap};
use std::sync::Arc;

/// Core module: exports `add`, a linear memory, a bump `realloc`, and an
/// `echo` that returns its (ptr, len) argument pair unchanged.
fn core_module() -> kiln::ast::Module {
    let mut b = ModuleBuilder::new();
    b.add_memory(1, None);
    // Bump pointer for realloc allocations, starting past the low region.
    b.add_global(ValueType::I32, true, common::const_expr_i32(4096));

    let add_ty = b.add_type(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]);
    let add = b.add_func(
        add_ty,
        vec![],
        vec![LocalGet { idx: 0 }, LocalGet { idx: 1 }, I32Add, End],
    );

    // realloc(old_ptr, old_len, align, new_len) -> ptr
    let realloc_ty = b.add_type(
        vec![ValueType::I32, ValueType::I32, ValueType::I32, ValueType::I32],
        vec![ValueType::I32],
    );
    let realloc = b.add_func(
        realloc_ty,
        vec![],
        vec![
            GlobalGet { idx: 0 },
            GlobalGet { idx: 0 },
            LocalGet { idx: 3 },
            I32Add,
            GlobalSet { idx: 0 },
            End,
        ],
    );

    // echo(ptr, len) -> (ptr, len)
    let echo_ty = b.add_type(
        vec![ValueType::I32, ValueType::I32],
        vec![ValueType::I32, ValueType::I32],
    );
    let echo = b.add_func(
        echo_ty,
        vec![],
        vec![LocalGet { idx: 0 }, LocalGet { idx: 1 }, End],
    );

    b.export_func("add", add);
    b.export_func("realloc", realloc);
    b.export_func("echo", echo);
    b.export_memory("memory", 0);
    b.build()
}

fn alias(instance_idx: u32, name: &str) -> ComponentSection {
    ComponentSection::Alias(Alias {
        target: AliasTarget::CoreExport {
            instance_idx,
            name: name.to_string(),
        },
    })
}

#[test]
fn test_lift_primitive_function() {
    let component = Component {
        modules: vec![core_module()],
        func_types: vec![ComponentFuncType {
            params: vec![
                ("a".to_string(), InterfaceType::S32),
                ("b".to_string(), InterfaceType::S32),
            ],
            results: vec![InterfaceType::S32],
        }],
        sections: vec![
            ComponentSection::CoreInstance(CoreInstanceExpr::Instantiate {
                module_idx: 0,
                args: vec![],
            }),
            alias(0, "add"),
            ComponentSection::Canon(Canon::Lift {
                core_func_idx: 0,
                type_idx: 0,
                opts: CanonOpts::default(),
            }),
            ComponentSection::Export(ComponentExport {
                name: "add".to_string(),
                kind: ComponentExportKind::Func,
                index: 0,
            }),
        ],
    };

    let executor = Arc::new(Executor::default());
    let mut store = Store::new();
    let instance = executor.instantiate_component(&mut store, &component).unwrap();
    let add = instance.exported_func("add").unwrap();

    let results = executor
        .invoke_component(add, vec![InterfaceValue::S32(40), InterfaceValue::S32(2)])
        .unwrap();
    assert_eq!(results, vec![InterfaceValue::S32(42)]);

    // Arity mismatch is rejected before the adapter runs.
    assert_eq!(
        executor.invoke_component(add, vec![InterfaceValue::S32(1)]),
        Err(Trap::IndirectCallTypeMismatch)
    );
}

#[test]
fn test_lift_string_through_memory_and_realloc() {
    let component = Component {
        modules: vec![core_module()],
        func_types: vec![ComponentFuncType {
            params: vec![("s".to_string(), InterfaceType::String)],
            results: vec![InterfaceType::String],
        }],
        sections: vec![
            ComponentSection::CoreInstance(CoreInstanceExpr::Instantiate {
                module_idx: 0,
                args: vec![],
            }),
            alias(0, "memory"),
            alias(0, "realloc"),
            alias(0, "echo"),
            ComponentSection::Canon(Canon::Lift {
                core_func_idx: 1, // echo (realloc is core func 0)
                type_idx: 0,
                opts: CanonOpts {
                    memory: Some(0),
                    realloc: Some(0),
                },
            }),
            ComponentSection::Export(ComponentExport {
                name: "echo".to_string(),
                kind: ComponentExportKind::Func,
                index: 0,
            }),
        ],
    };

    let executor = Arc::new(Executor::default());
    let mut store = Store::new();
    let instance = executor.instantiate_component(&mut store, &component).unwrap();
    let echo = instance.exported_func("echo").unwrap();

    let results = executor
        .invoke_component(echo, vec![InterfaceValue::String("hello component".to_string())])
        .unwrap();
    assert_eq!(results, vec![InterfaceValue::String("hello component".to_string())]);
}

#[test]
fn test_lower_wraps_component_function_as_core() {
    // Lift `add`, then lower the lifted function back into the core
    // index space; the lowered wrapper behaves as a plain core function.
    let component = Component {
        modules: vec![core_module()],
        func_types: vec![ComponentFuncType {
            params: vec![
                ("a".to_string(), InterfaceType::S32),
                ("b".to_string(), InterfaceType::S32),
            ],
            results: vec![InterfaceType::S32],
        }],
        sections: vec![
            ComponentSection::CoreInstance(CoreInstanceExpr::Instantiate {
                module_idx: 0,
                args: vec![],
            }),
            alias(0, "add"),
            ComponentSection::Canon(Canon::Lift {
                core_func_idx: 0,
                type_idx: 0,
                opts: CanonOpts::default(),
            }),
            // Lower the lifted function back into the core index space.
            ComponentSection::Canon(Canon::Lower {
                func_idx: 0,
                opts: CanonOpts::default(),
            }),
            ComponentSection::Export(ComponentExport {
                name: "adder".to_string(),
                kind: ComponentExportKind::CoreInstance,
                index: 0,
            }),
        ],
    };

    let executor = Arc::new(Executor::default());
    let mut store = Store::new();
    let instance = executor.instantiate_component(&mut store, &component).unwrap();

    // core_funcs[0] is the alias of `add`, [1] the lowered wrapper.
    let lowered = instance.core_func(1).expect("lowered core function");
    let results = executor
        .invoke(
            lowered,
            &[kiln::runtime::Value::I32(20), kiln::runtime::Value::I32(22)],
            &[ValueType::I32, ValueType::I32],
        )
        .unwrap();
    assert_eq!(results[0].0, kiln::runtime::Value::I32(42));
}

#[test]
fn test_component_start_failure() {
    // A start function whose core body traps aborts instantiation.
    let mut m = ModuleBuilder::new();
    let ty = m.add_type(vec![], vec![]);
    let boom = m.add_func(ty, vec![], vec![Unreachable, End]);
    m.export_func("boom", boom);

    let component = Component {
        modules: vec![m.build()],
        func_types: vec![ComponentFuncType {
            params: vec![],
            results: vec![],
        }],
        sections: vec![
            ComponentSection::CoreInstance(CoreInstanceExpr::Instantiate {
                module_idx: 0,
                args: vec![],
            }),
            alias(0, "boom"),
            ComponentSection::Canon(Canon::Lift {
                core_func_idx: 0,
                type_idx: 0,
                opts: CanonOpts::default(),
            }),
            ComponentSection::Start { func_idx: 0 },
        ],
    };

    let executor = Arc::new(Executor::default());
    let mut store = Store::new();
    let err = executor.instantiate_component(&mut store, &component).unwrap_err();
    assert!(matches!(
        err,
        kiln::runtime::InstantiateError::StartFunctionFailed(Trap::Unreachable)
    ));
}

#[test]
fn test_register_component() {
    let component = Component {
        modules: vec![core_module()],
        func_types: vec![],
        sections: vec![ComponentSection::CoreInstance(CoreInstanceExpr::Instantiate {
            module_idx: 0,
            args: vec![],
        })],
    };

    let executor = Arc::new(Executor::default());
    let mut store = Store::new();
    executor.register_component(&mut store, &component, "c").unwrap();
    assert!(store.component("c").is_some());
    let err = executor.register_component(&mut store, &component, "c").unwrap_err();
    assert!(matches!(err, kiln::runtime::InstantiateError::ModuleNameConflict(_)));
}
