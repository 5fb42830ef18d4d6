//! Common test utilities shared between integration tests

use kiln::ast::types::{
    FunctionType, GlobalType, Limits, MemoryType, RefType, SubType, TableType, TagType, ValueType,
};
use kiln::ast::{
    DataMode, DataSegment, ElementMode, ElementSegment, Export, ExternalKind, FuncBody, GlobalDecl,
    Import, ImportDesc, Instruction, Module, TableDecl,
};
use kiln::executor::Executor;
use kiln::runtime::{ModuleInstance, Store, Trap, Value};
use std::sync::Arc;

/// Incrementally builds a validated-module structure for tests.
#[derive(Default)]
pub struct ModuleBuilder {
    module: Module,
    imported_funcs: u32,
}

impl ModuleBuilder {
    pub fn new() -> ModuleBuilder {
        ModuleBuilder::default()
    }

    /// Add a function type, returning its type index.
    pub fn add_type(&mut self, params: Vec<ValueType>, results: Vec<ValueType>) -> u32 {
        self.module.types.push(SubType::func(params, results));
        (self.module.types.len() - 1) as u32
    }

    /// Add an arbitrary defined type, returning its type index.
    pub fn add_sub_type(&mut self, sub: SubType) -> u32 {
        self.module.types.push(sub);
        (self.module.types.len() - 1) as u32
    }

    /// Import a function; must precede `add_func` calls.
    pub fn import_func(&mut self, module: &str, name: &str, type_idx: u32) -> u32 {
        self.module.imports.push(Import {
            module: module.to_string(),
            name: name.to_string(),
            desc: ImportDesc::Func { type_idx },
        });
        self.imported_funcs += 1;
        self.imported_funcs - 1
    }

    /// Import a global; must precede `add_global` calls.
    pub fn import_global(&mut self, module: &str, name: &str, value: ValueType, mutable: bool) {
        self.module.imports.push(Import {
            module: module.to_string(),
            name: name.to_string(),
            desc: ImportDesc::Global(GlobalType { value, mutable }),
        });
    }

    /// Add a defined function, returning its function index (imports
    /// included).
    pub fn add_func(&mut self, type_idx: u32, locals: Vec<(u32, ValueType)>, body: Vec<Instruction>) -> u32 {
        self.module.funcs.push(type_idx);
        self.module.code.push(FuncBody::new(locals, body));
        self.imported_funcs + (self.module.funcs.len() - 1) as u32
    }

    pub fn add_memory(&mut self, min: u32, max: Option<u32>) -> u32 {
        self.module.memories.push(MemoryType {
            limits: Limits::new(min, max),
        });
        (self.module.memories.len() - 1) as u32
    }

    pub fn add_shared_memory(&mut self, min: u32, max: u32) -> u32 {
        self.module.memories.push(MemoryType {
            limits: Limits::shared(min, max),
        });
        (self.module.memories.len() - 1) as u32
    }

    pub fn add_table(&mut self, elem: RefType, min: u32, max: Option<u32>) -> u32 {
        self.module.tables.push(TableDecl::new(TableType {
            elem,
            limits: Limits::new(min, max),
        }));
        (self.module.tables.len() - 1) as u32
    }

    pub fn add_global(&mut self, value: ValueType, mutable: bool, init: Vec<Instruction>) -> u32 {
        self.module.globals.push(GlobalDecl {
            ty: GlobalType { value, mutable },
            init,
        });
        (self.module.globals.len() - 1) as u32
    }

    pub fn add_tag(&mut self, type_idx: u32) -> u32 {
        self.module.tags.push(TagType { type_idx });
        (self.module.tags.len() - 1) as u32
    }

    pub fn active_elem(&mut self, table_idx: u32, offset: Vec<Instruction>, func_indices: &[u32]) {
        self.module.elements.push(ElementSegment {
            mode: ElementMode::Active { table_idx, offset },
            elem_type: RefType::funcref(),
            items: func_indices
                .iter()
                .map(|&idx| vec![Instruction::RefFunc { func_idx: idx }, Instruction::End])
                .collect(),
        });
    }

    pub fn passive_elem(&mut self, func_indices: &[u32]) -> u32 {
        self.module.elements.push(ElementSegment {
            mode: ElementMode::Passive,
            elem_type: RefType::funcref(),
            items: func_indices
                .iter()
                .map(|&idx| vec![Instruction::RefFunc { func_idx: idx }, Instruction::End])
                .collect(),
        });
        (self.module.elements.len() - 1) as u32
    }

    pub fn active_data(&mut self, memory_idx: u32, offset: Vec<Instruction>, bytes: Vec<u8>) {
        self.module.datas.push(DataSegment {
            mode: DataMode::Active { memory_idx, offset },
            bytes,
        });
    }

    pub fn passive_data(&mut self, bytes: Vec<u8>) -> u32 {
        self.module.datas.push(DataSegment {
            mode: DataMode::Passive,
            bytes,
        });
        (self.module.datas.len() - 1) as u32
    }

    pub fn export_func(&mut self, name: &str, index: u32) {
        self.module.exports.push(Export::new(name, ExternalKind::Func, index));
    }

    pub fn export_memory(&mut self, name: &str, index: u32) {
        self.module.exports.push(Export::new(name, ExternalKind::Memory, index));
    }

    pub fn export_global(&mut self, name: &str, index: u32) {
        self.module.exports.push(Export::new(name, ExternalKind::Global, index));
    }

    pub fn set_start(&mut self, func_idx: u32) {
        self.module.start = Some(func_idx);
    }

    pub fn build(self) -> Module {
        self.module
    }
}

/// `i32.const` shorthand for constant expressions.
pub fn const_expr_i32(value: i32) -> Vec<Instruction> {
    vec![Instruction::I32Const { value }, Instruction::End]
}

/// Instantiate a module against a fresh store.
pub fn instantiate(module: &Module) -> (Arc<Executor>, Store, Arc<ModuleInstance>) {
    let executor = Arc::new(Executor::default());
    let mut store = Store::new();
    let instance = executor
        .instantiate_module(&mut store, module)
        .expect("instantiation should succeed");
    (executor, store, instance)
}

/// Invoke an export with parameters, returning the bare result values.
pub fn invoke(
    executor: &Executor,
    instance: &Arc<ModuleInstance>,
    name: &str,
    params: &[Value],
) -> Result<Vec<Value>, Trap> {
    let func = instance
        .exported_func(name)
        .unwrap_or_else(|| panic!("export {name} should exist"));
    let param_types: Vec<ValueType> = func.ty().params.clone();
    executor
        .invoke(&func, params, &param_types)
        .map(|results| results.into_iter().map(|(v, _)| v).collect())
}

/// The signature `(params) -> (results)` as a plain function type.
pub fn sig(params: Vec<ValueType>, results: Vec<ValueType>) -> FunctionType {
    FunctionType::new(params, results)
}
