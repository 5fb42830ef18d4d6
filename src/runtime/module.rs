//! Module instances
//!
//! A module instance owns its defined entities, holds non-owning-in-spirit
//! `Arc` handles to imported ones (uniform handles keep the supplier alive
//! for as long as any importer), and publishes its export table. The
//! instance is created empty behind its `Arc` and populated during
//! instantiation so functions can hold a weak back-reference to it.

use crate::ast::types::{FunctionType, SubType};
use crate::runtime::func::FunctionInstance;
use crate::runtime::global::GlobalInstance;
use crate::runtime::memory::MemoryInstance;
use crate::runtime::segment::{DataInstance, ElementInstance};
use crate::runtime::table::TableInstance;
use crate::runtime::tag::TagInstance;
use crate::runtime::value::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A typed export/import handle.
#[derive(Debug, Clone)]
pub enum ExternVal {
    Func(Arc<FunctionInstance>),
    Table(Arc<TableInstance>),
    Memory(Arc<MemoryInstance>),
    Global(Arc<GlobalInstance>),
    Tag(Arc<TagInstance>),
}

impl ExternVal {
    /// Short kind name, used in import error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ExternVal::Func(_) => "function",
            ExternVal::Table(_) => "table",
            ExternVal::Memory(_) => "memory",
            ExternVal::Global(_) => "global",
            ExternVal::Tag(_) => "tag",
        }
    }
}

/// A module instance.
#[derive(Debug)]
pub struct ModuleInstance {
    name: RwLock<Option<String>>,
    types: Arc<Vec<SubType>>,
    funcs: RwLock<Vec<Arc<FunctionInstance>>>,
    tables: RwLock<Vec<Arc<TableInstance>>>,
    mems: RwLock<Vec<Arc<MemoryInstance>>>,
    tags: RwLock<Vec<Arc<TagInstance>>>,
    globals: RwLock<Vec<Arc<GlobalInstance>>>,
    elems: RwLock<Vec<Arc<ElementInstance>>>,
    datas: RwLock<Vec<Arc<DataInstance>>>,
    exports: RwLock<HashMap<String, ExternVal>>,
    start: RwLock<Option<Arc<FunctionInstance>>>,
}

impl ModuleInstance {
    /// Create an empty instance over the module's defined types.
    pub fn new(types: Vec<SubType>) -> Arc<ModuleInstance> {
        Arc::new(ModuleInstance {
            name: RwLock::new(None),
            types: Arc::new(types),
            funcs: RwLock::new(Vec::new()),
            tables: RwLock::new(Vec::new()),
            mems: RwLock::new(Vec::new()),
            tags: RwLock::new(Vec::new()),
            globals: RwLock::new(Vec::new()),
            elems: RwLock::new(Vec::new()),
            datas: RwLock::new(Vec::new()),
            exports: RwLock::new(HashMap::new()),
            start: RwLock::new(None),
        })
    }

    /// Registered name, if any.
    pub fn name(&self) -> Option<String> {
        self.name.read().unwrap().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.write().unwrap() = Some(name.to_string());
    }

    /// The defined-type table.
    pub fn types(&self) -> &Arc<Vec<SubType>> {
        &self.types
    }

    /// Defined type at `idx`.
    pub fn sub_type(&self, idx: u32) -> Option<&SubType> {
        self.types.get(idx as usize)
    }

    /// Function signature at type index `idx`, if it is a function type.
    pub fn func_type(&self, idx: u32) -> Option<FunctionType> {
        self.sub_type(idx).and_then(|s| s.composite.as_func()).cloned()
    }

    pub fn push_func(&self, f: Arc<FunctionInstance>) {
        self.funcs.write().unwrap().push(f);
    }

    pub fn push_table(&self, t: Arc<TableInstance>) {
        self.tables.write().unwrap().push(t);
    }

    pub fn push_memory(&self, m: Arc<MemoryInstance>) {
        self.mems.write().unwrap().push(m);
    }

    pub fn push_tag(&self, t: Arc<TagInstance>) {
        self.tags.write().unwrap().push(t);
    }

    pub fn push_global(&self, g: Arc<GlobalInstance>) {
        self.globals.write().unwrap().push(g);
    }

    pub fn push_elem(&self, e: Arc<ElementInstance>) {
        self.elems.write().unwrap().push(e);
    }

    pub fn push_data(&self, d: Arc<DataInstance>) {
        self.datas.write().unwrap().push(d);
    }

    pub fn func(&self, idx: u32) -> Option<Arc<FunctionInstance>> {
        self.funcs.read().unwrap().get(idx as usize).cloned()
    }

    pub fn table(&self, idx: u32) -> Option<Arc<TableInstance>> {
        self.tables.read().unwrap().get(idx as usize).cloned()
    }

    pub fn memory(&self, idx: u32) -> Option<Arc<MemoryInstance>> {
        self.mems.read().unwrap().get(idx as usize).cloned()
    }

    pub fn tag(&self, idx: u32) -> Option<Arc<TagInstance>> {
        self.tags.read().unwrap().get(idx as usize).cloned()
    }

    pub fn global(&self, idx: u32) -> Option<Arc<GlobalInstance>> {
        self.globals.read().unwrap().get(idx as usize).cloned()
    }

    pub fn elem(&self, idx: u32) -> Option<Arc<ElementInstance>> {
        self.elems.read().unwrap().get(idx as usize).cloned()
    }

    pub fn data(&self, idx: u32) -> Option<Arc<DataInstance>> {
        self.datas.read().unwrap().get(idx as usize).cloned()
    }

    pub fn func_count(&self) -> usize {
        self.funcs.read().unwrap().len()
    }

    pub fn add_export(&self, name: &str, value: ExternVal) {
        self.exports.write().unwrap().insert(name.to_string(), value);
    }

    /// Look up an export by name.
    pub fn export(&self, name: &str) -> Option<ExternVal> {
        self.exports.read().unwrap().get(name).cloned()
    }

    /// Exported function by name, for the common invocation path.
    pub fn exported_func(&self, name: &str) -> Option<Arc<FunctionInstance>> {
        match self.export(name) {
            Some(ExternVal::Func(f)) => Some(f),
            _ => None,
        }
    }

    pub fn export_names(&self) -> Vec<String> {
        self.exports.read().unwrap().keys().cloned().collect()
    }

    pub fn set_start(&self, f: Arc<FunctionInstance>) {
        *self.start.write().unwrap() = Some(f);
    }

    pub fn start(&self) -> Option<Arc<FunctionInstance>> {
        self.start.read().unwrap().clone()
    }

    /// Collect every value this instance can reach directly, used as GC
    /// roots: global values, table slots, and element segment contents.
    pub fn gc_roots(&self, out: &mut Vec<Value>) {
        for g in self.globals.read().unwrap().iter() {
            out.push(g.get());
        }
        for t in self.tables.read().unwrap().iter() {
            out.extend(t.snapshot().into_iter().map(Value::Ref));
        }
        for e in self.elems.read().unwrap().iter() {
            out.extend(e.snapshot().into_iter().map(Value::Ref));
        }
    }
}
