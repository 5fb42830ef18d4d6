//! Component instantiation and the canonical-ABI adaptor
//!
//! Walks a validated component's sections in order: core instances are
//! instantiated with imports satisfied by named prior instances, aliases
//! project core exports into the component index spaces, and the canon
//! section builds the lifted/lowered adapters. The adaptor here covers
//! primitives and strings; compound interface types stay with the full
//! coercion layer.
//!
//! Memory and realloc named by canon options are captured by `Arc`, so
//! the adapters keep their backing instances alive.

use crate::ast::component::{
    AliasTarget, Canon, CanonOpts, Component, ComponentFuncType, ComponentSection, CoreInstanceExpr,
    InterfaceType,
};
use crate::ast::types::{FunctionType, ValueType};
use crate::executor::{instantiate, Executor};
use crate::runtime::component::{ComponentExternVal, ComponentFunction, InterfaceValue};
use crate::runtime::{
    ComponentInstance, ExternVal, FunctionInstance, InstantiateError, MemoryInstance, ModuleInstance,
    StackManager, Store, Trap, Value,
};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

impl Executor {
    /// Instantiate a component into an anonymous instance. The caller
    /// owns the result; on failure the store is unchanged.
    pub fn instantiate_component(
        self: &Arc<Self>,
        store: &mut Store,
        component: &Component,
    ) -> Result<Arc<ComponentInstance>, InstantiateError> {
        let mut inst = ComponentInstance::new();

        for section in &component.sections {
            match section {
                ComponentSection::CoreInstance(expr) => {
                    let core = self.build_core_instance(component, &inst, expr)?;
                    inst.push_core_instance(core);
                }
                ComponentSection::Alias(alias) => self.resolve_alias(&mut inst, &alias.target)?,
                ComponentSection::Canon(canon) => self.build_canon(component, &mut inst, canon)?,
                ComponentSection::Start { func_idx } => {
                    let f = inst
                        .func(*func_idx)
                        .ok_or_else(|| InstantiateError::ValidationFailed("start function index".to_string()))?
                        .clone();
                    debug!("running component start function {func_idx}");
                    f.call(Vec::new()).map_err(InstantiateError::StartFunctionFailed)?;
                }
                ComponentSection::Import { name } => {
                    // A component import is satisfied by a registered
                    // module whose exports become a core instance.
                    let supplied = store.module(name).cloned().ok_or_else(|| InstantiateError::UndefinedImport {
                        module: name.clone(),
                        name: String::new(),
                    })?;
                    inst.push_core_instance(supplied);
                }
                ComponentSection::Export(export) => {
                    let value = match export.kind {
                        crate::ast::component::ComponentExportKind::Func => inst
                            .func(export.index)
                            .cloned()
                            .map(ComponentExternVal::Func),
                        crate::ast::component::ComponentExportKind::CoreInstance => inst
                            .core_instance(export.index)
                            .cloned()
                            .map(ComponentExternVal::CoreInstance),
                    }
                    .ok_or_else(|| {
                        InstantiateError::ValidationFailed(format!("component export index for {}", export.name))
                    })?;
                    inst.add_export(&export.name, value);
                }
            }
        }

        Ok(Arc::new(inst))
    }

    /// Instantiate a component and register it under `name`.
    pub fn register_component(
        self: &Arc<Self>,
        store: &mut Store,
        component: &Component,
        name: &str,
    ) -> Result<Arc<ComponentInstance>, InstantiateError> {
        if store.component(name).is_some() {
            return Err(InstantiateError::ModuleNameConflict(name.to_string()));
        }
        let inst = self.instantiate_component(store, component)?;
        store.register_component(name, inst.clone())?;
        Ok(inst)
    }

    /// Register a pre-instantiated component under the name it carries.
    pub fn register_component_instance(
        &self,
        store: &mut Store,
        inst: Arc<ComponentInstance>,
    ) -> Result<(), InstantiateError> {
        let name = inst
            .name()
            .ok_or_else(|| InstantiateError::ValidationFailed("component instance has no name".to_string()))?;
        store.register_component(&name, inst)
    }

    /// Invoke a component function with interface-typed values.
    pub fn invoke_component(
        &self,
        func: &Arc<ComponentFunction>,
        params: Vec<InterfaceValue>,
    ) -> Result<Vec<InterfaceValue>, Trap> {
        if params.len() != func.ty().params.len() {
            return Err(Trap::IndirectCallTypeMismatch);
        }
        func.call(params)
    }

    fn build_core_instance(
        self: &Arc<Self>,
        component: &Component,
        inst: &ComponentInstance,
        expr: &CoreInstanceExpr,
    ) -> Result<Arc<ModuleInstance>, InstantiateError> {
        match expr {
            CoreInstanceExpr::Instantiate { module_idx, args } => {
                let module = component
                    .modules
                    .get(*module_idx as usize)
                    .ok_or_else(|| InstantiateError::ValidationFailed("core module index".to_string()))?;
                // Import module names resolve through the named argument
                // instances only.
                let mut named: HashMap<&str, Arc<ModuleInstance>> = HashMap::new();
                for arg in args {
                    let supplied = inst
                        .core_instance(arg.instance_idx)
                        .cloned()
                        .ok_or_else(|| InstantiateError::ValidationFailed("core instance index".to_string()))?;
                    named.insert(arg.name.as_str(), supplied);
                }
                let resolver =
                    |module_name: &str, field: &str| named.get(module_name).and_then(|m| m.export(field));
                instantiate::instantiate(self, &resolver, module)
            }
            CoreInstanceExpr::FromExports(exports) => {
                // Synthesize an instance that re-exports entries of prior
                // core instances.
                let synthetic = ModuleInstance::new(Vec::new());
                for export in exports {
                    let source = inst
                        .core_instance(export.instance_idx)
                        .ok_or_else(|| InstantiateError::ValidationFailed("core instance index".to_string()))?;
                    let value = source.export(&export.name).ok_or_else(|| {
                        InstantiateError::ValidationFailed(format!("missing core export {}", export.name))
                    })?;
                    synthetic.add_export(&export.name, value);
                }
                Ok(synthetic)
            }
        }
    }

    fn resolve_alias(&self, inst: &mut ComponentInstance, target: &AliasTarget) -> Result<(), InstantiateError> {
        match target {
            AliasTarget::CoreExport { instance_idx, name } => {
                let source = inst
                    .core_instance(*instance_idx)
                    .ok_or_else(|| InstantiateError::ValidationFailed("alias instance index".to_string()))?;
                match source.export(name) {
                    Some(ExternVal::Func(f)) => {
                        inst.push_core_func(f);
                        Ok(())
                    }
                    Some(ExternVal::Memory(m)) => {
                        inst.push_core_memory(m);
                        Ok(())
                    }
                    Some(other) => Err(InstantiateError::ValidationFailed(format!(
                        "alias of {} export {name}",
                        other.kind_name()
                    ))),
                    None => Err(InstantiateError::ValidationFailed(format!("missing alias target {name}"))),
                }
            }
        }
    }

    fn build_canon(
        self: &Arc<Self>,
        component: &Component,
        inst: &mut ComponentInstance,
        canon: &Canon,
    ) -> Result<(), InstantiateError> {
        match canon {
            Canon::Lift {
                core_func_idx,
                type_idx,
                opts,
            } => {
                let core = inst
                    .core_func(*core_func_idx)
                    .cloned()
                    .ok_or_else(|| InstantiateError::ValidationFailed("canon.lift core function".to_string()))?;
                let ty = component
                    .func_types
                    .get(*type_idx as usize)
                    .cloned()
                    .ok_or_else(|| InstantiateError::ValidationFailed("canon.lift type index".to_string()))?;
                let adapters = self.canon_env(inst, opts)?;
                let lifted = lift_function(self.clone(), ty.clone(), core, adapters);
                inst.push_func(Arc::new(ComponentFunction::new(ty, lifted)));
                Ok(())
            }
            Canon::Lower { func_idx, opts } => {
                let target = inst
                    .func(*func_idx)
                    .cloned()
                    .ok_or_else(|| InstantiateError::ValidationFailed("canon.lower function".to_string()))?;
                let adapters = self.canon_env(inst, opts)?;
                let lowered = lower_function(self.clone(), target, adapters);
                inst.push_core_func(lowered);
                Ok(())
            }
        }
    }

    fn canon_env(&self, inst: &ComponentInstance, opts: &CanonOpts) -> Result<CanonEnv, InstantiateError> {
        let memory = match opts.memory {
            Some(idx) => Some(
                inst.core_memory(idx)
                    .cloned()
                    .ok_or_else(|| InstantiateError::ValidationFailed("canon memory index".to_string()))?,
            ),
            None => None,
        };
        let realloc = match opts.realloc {
            Some(idx) => Some(
                inst.core_func(idx)
                    .cloned()
                    .ok_or_else(|| InstantiateError::ValidationFailed("canon realloc index".to_string()))?,
            ),
            None => None,
        };
        Ok(CanonEnv { memory, realloc })
    }
}

/// The memory and realloc a canonical adapter captured.
#[derive(Clone)]
struct CanonEnv {
    memory: Option<Arc<MemoryInstance>>,
    realloc: Option<Arc<FunctionInstance>>,
}

impl CanonEnv {
    fn memory(&self) -> Result<&Arc<MemoryInstance>, Trap> {
        self.memory.as_ref().ok_or(Trap::OutOfBoundsMemAccess)
    }

    /// Allocate `len` bytes in guest memory through the captured realloc.
    fn alloc(&self, ex: &Executor, len: u32) -> Result<u32, Trap> {
        let realloc = self.realloc.as_ref().ok_or(Trap::OutOfBoundsMemAccess)?;
        let mut stack = StackManager::new();
        ex.run_function(
            &mut stack,
            realloc,
            vec![Value::I32(0), Value::I32(0), Value::I32(1), Value::I32(len as i32)],
        )?;
        stack.pop_i32().map(|p| p as u32)
    }
}

/// Core value types one interface type flattens into.
fn flat_types(ty: InterfaceType) -> &'static [ValueType] {
    match ty {
        InterfaceType::S64 | InterfaceType::U64 => &[ValueType::I64],
        InterfaceType::F32 => &[ValueType::F32],
        InterfaceType::F64 => &[ValueType::F64],
        InterfaceType::String => &[ValueType::I32, ValueType::I32],
        _ => &[ValueType::I32],
    }
}

/// The core signature a component function type flattens into.
fn flat_signature(ty: &ComponentFuncType) -> FunctionType {
    let mut params = Vec::new();
    for (_, p) in &ty.params {
        params.extend_from_slice(flat_types(*p));
    }
    let mut results = Vec::new();
    for r in &ty.results {
        results.extend_from_slice(flat_types(*r));
    }
    FunctionType::new(params, results)
}

/// Lower one interface value into core values, allocating indirect
/// payloads (strings) through the captured memory and realloc.
fn lower_value(ex: &Executor, env: &CanonEnv, value: &InterfaceValue, out: &mut Vec<Value>) -> Result<(), Trap> {
    match value {
        InterfaceValue::Bool(b) => out.push(Value::I32(*b as i32)),
        InterfaceValue::S8(v) => out.push(Value::I32(*v as i32)),
        InterfaceValue::U8(v) => out.push(Value::I32(*v as i32)),
        InterfaceValue::S16(v) => out.push(Value::I32(*v as i32)),
        InterfaceValue::U16(v) => out.push(Value::I32(*v as i32)),
        InterfaceValue::S32(v) => out.push(Value::I32(*v)),
        InterfaceValue::U32(v) => out.push(Value::I32(*v as i32)),
        InterfaceValue::S64(v) => out.push(Value::I64(*v)),
        InterfaceValue::U64(v) => out.push(Value::I64(*v as i64)),
        InterfaceValue::F32(v) => out.push(Value::F32(*v)),
        InterfaceValue::F64(v) => out.push(Value::F64(*v)),
        InterfaceValue::Char(c) => out.push(Value::I32(*c as i32)),
        InterfaceValue::String(s) => {
            let bytes = s.as_bytes();
            let ptr = env.alloc(ex, bytes.len() as u32)?;
            env.memory()?.write_bytes(ptr, bytes)?;
            out.push(Value::I32(ptr as i32));
            out.push(Value::I32(bytes.len() as i32));
        }
    }
    Ok(())
}

/// Lift one interface value from a stream of core values.
fn lift_value(
    env: &CanonEnv,
    ty: InterfaceType,
    core: &mut impl Iterator<Item = Value>,
) -> Result<InterfaceValue, Trap> {
    let mut next_i32 = |core: &mut dyn Iterator<Item = Value>| -> Result<i32, Trap> {
        core.next().and_then(|v| v.as_i32()).ok_or(Trap::Unreachable)
    };
    Ok(match ty {
        InterfaceType::Bool => InterfaceValue::Bool(next_i32(core)? != 0),
        InterfaceType::S8 => InterfaceValue::S8(next_i32(core)? as i8),
        InterfaceType::U8 => InterfaceValue::U8(next_i32(core)? as u8),
        InterfaceType::S16 => InterfaceValue::S16(next_i32(core)? as i16),
        InterfaceType::U16 => InterfaceValue::U16(next_i32(core)? as u16),
        InterfaceType::S32 => InterfaceValue::S32(next_i32(core)?),
        InterfaceType::U32 => InterfaceValue::U32(next_i32(core)? as u32),
        InterfaceType::S64 => {
            InterfaceValue::S64(core.next().and_then(|v| v.as_i64()).ok_or(Trap::Unreachable)?)
        }
        InterfaceType::U64 => {
            InterfaceValue::U64(core.next().and_then(|v| v.as_i64()).ok_or(Trap::Unreachable)? as u64)
        }
        InterfaceType::F32 => {
            InterfaceValue::F32(core.next().and_then(|v| v.as_f32()).ok_or(Trap::Unreachable)?)
        }
        InterfaceType::F64 => {
            InterfaceValue::F64(core.next().and_then(|v| v.as_f64()).ok_or(Trap::Unreachable)?)
        }
        InterfaceType::Char => {
            let code = next_i32(core)? as u32;
            InterfaceValue::Char(char::from_u32(code).ok_or(Trap::CastFailed)?)
        }
        InterfaceType::String => {
            let ptr = next_i32(core)? as u32;
            let len = next_i32(core)? as u32;
            let bytes = env.memory()?.read_bytes(ptr, len as usize)?;
            InterfaceValue::String(String::from_utf8(bytes).map_err(|_| Trap::CastFailed)?)
        }
    })
}

/// Build the component-side callable of `canon.lift`: lower interface
/// arguments to core values, invoke the core function, lift the results.
fn lift_function(
    ex: Arc<Executor>,
    ty: ComponentFuncType,
    core: Arc<FunctionInstance>,
    env: CanonEnv,
) -> crate::runtime::component::ComponentCallable {
    Box::new(move |args: Vec<InterfaceValue>| {
        let mut core_args = Vec::new();
        for value in &args {
            lower_value(&ex, &env, value, &mut core_args)?;
        }
        let mut stack = StackManager::new();
        ex.run_function(&mut stack, &core, core_args)?;
        let raw = stack.pop_n(core.ty().results.len())?;
        let mut stream = raw.into_iter();
        let mut results = Vec::with_capacity(ty.results.len());
        for r in &ty.results {
            results.push(lift_value(&env, *r, &mut stream)?);
        }
        Ok(results)
    })
}

/// Build the core function of `canon.lower`: lift core arguments to
/// interface values, invoke the component function, lower the results.
fn lower_function(
    ex: Arc<Executor>,
    target: Arc<ComponentFunction>,
    env: CanonEnv,
) -> Arc<FunctionInstance> {
    let sig = flat_signature(target.ty());
    let ty = target.ty().clone();
    let callable = Box::new(move |core_args: Vec<Value>| -> Result<Vec<Value>, Trap> {
        let mut stream = core_args.into_iter();
        let mut args = Vec::with_capacity(ty.params.len());
        for (_, p) in &ty.params {
            args.push(lift_value(&env, *p, &mut stream)?);
        }
        let results = target.call(args)?;
        let mut out = Vec::new();
        for value in &results {
            lower_value(&ex, &env, value, &mut out)?;
        }
        Ok(out)
    });
    Arc::new(FunctionInstance::new_host(sig, callable))
}
