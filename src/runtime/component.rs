//! Component instances
//!
//! A component instance owns the core module instances it created, the
//! core functions projected by aliases or produced by `canon.lower`, and
//! the component-level functions produced by `canon.lift`. Component
//! functions speak interface values; the canonical-ABI adaptor in the
//! executor does the marshalling.

use crate::ast::component::ComponentFuncType;
use crate::runtime::func::FunctionInstance;
use crate::runtime::memory::MemoryInstance;
use crate::runtime::module::ModuleInstance;
use crate::runtime::Trap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// An interface-typed value crossing a component function boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum InterfaceValue {
    Bool(bool),
    S8(i8),
    U8(u8),
    S16(i16),
    U16(u16),
    S32(i32),
    U32(u32),
    S64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
}

/// The callable behind a component function.
pub type ComponentCallable = Box<dyn Fn(Vec<InterfaceValue>) -> Result<Vec<InterfaceValue>, Trap> + Send + Sync>;

/// A component-level function instance: an interface-typed signature and
/// a callable that performs canonical-ABI lowering/lifting around a core
/// function.
pub struct ComponentFunction {
    ty: ComponentFuncType,
    callable: ComponentCallable,
}

impl ComponentFunction {
    pub fn new(ty: ComponentFuncType, callable: ComponentCallable) -> ComponentFunction {
        ComponentFunction { ty, callable }
    }

    pub fn ty(&self) -> &ComponentFuncType {
        &self.ty
    }

    pub fn call(&self, args: Vec<InterfaceValue>) -> Result<Vec<InterfaceValue>, Trap> {
        (self.callable)(args)
    }
}

impl std::fmt::Debug for ComponentFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ComponentFunction({} params)", self.ty.params.len())
    }
}

/// What a component export names at runtime.
#[derive(Debug, Clone)]
pub enum ComponentExternVal {
    Func(Arc<ComponentFunction>),
    CoreInstance(Arc<ModuleInstance>),
}

/// A component instance.
#[derive(Debug, Default)]
pub struct ComponentInstance {
    name: RwLock<Option<String>>,
    /// Core instances in creation order
    core_instances: Vec<Arc<ModuleInstance>>,
    /// Core function index space (aliased exports and canon.lower results)
    core_funcs: Vec<Arc<FunctionInstance>>,
    /// Core memory index space (aliased exports), captured by the
    /// canonical-ABI adapters
    core_mems: Vec<Arc<MemoryInstance>>,
    /// Component function index space (canon.lift results)
    funcs: Vec<Arc<ComponentFunction>>,
    exports: HashMap<String, ComponentExternVal>,
}

impl ComponentInstance {
    pub fn new() -> ComponentInstance {
        ComponentInstance::default()
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().unwrap().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.write().unwrap() = Some(name.to_string());
    }

    pub fn push_core_instance(&mut self, inst: Arc<ModuleInstance>) {
        self.core_instances.push(inst);
    }

    pub fn push_core_memory(&mut self, mem: Arc<MemoryInstance>) {
        self.core_mems.push(mem);
    }

    pub fn core_memory(&self, idx: u32) -> Option<&Arc<MemoryInstance>> {
        self.core_mems.get(idx as usize)
    }

    pub fn core_instance(&self, idx: u32) -> Option<&Arc<ModuleInstance>> {
        self.core_instances.get(idx as usize)
    }

    pub fn core_instances(&self) -> &[Arc<ModuleInstance>] {
        &self.core_instances
    }

    pub fn push_core_func(&mut self, f: Arc<FunctionInstance>) {
        self.core_funcs.push(f);
    }

    pub fn core_func(&self, idx: u32) -> Option<&Arc<FunctionInstance>> {
        self.core_funcs.get(idx as usize)
    }

    pub fn push_func(&mut self, f: Arc<ComponentFunction>) {
        self.funcs.push(f);
    }

    pub fn func(&self, idx: u32) -> Option<&Arc<ComponentFunction>> {
        self.funcs.get(idx as usize)
    }

    pub fn add_export(&mut self, name: &str, value: ComponentExternVal) {
        self.exports.insert(name.to_string(), value);
    }

    pub fn export(&self, name: &str) -> Option<&ComponentExternVal> {
        self.exports.get(name)
    }

    /// Exported component function by name.
    pub fn exported_func(&self, name: &str) -> Option<&Arc<ComponentFunction>> {
        match self.exports.get(name) {
            Some(ComponentExternVal::Func(f)) => Some(f),
            _ => None,
        }
    }
}
