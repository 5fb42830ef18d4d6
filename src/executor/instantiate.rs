//! Module instantiation
//!
//! Builds a fresh module instance from a validated module in the fixed
//! order: imports, functions, tables, memories, tags, globals, elements
//! (and active table initialisation), data (and active memory
//! initialisation), exports, and finally the start function. A failure at
//! any step discards the partially built instance; the store is never
//! touched, so no observable change escapes.

use crate::ast::types::TableType;
use crate::ast::{DataMode, ElementMode, ExternalKind, ImportDesc, Module};
use crate::executor::ops::reference::bottom_of;
use crate::executor::{engine, Executor};
use crate::runtime::typing;
use crate::runtime::{
    DataInstance, ElementInstance, ExternVal, FunctionInstance, GlobalInstance, InstantiateError,
    MemoryInstance, ModuleInstance, Ref, StackManager, TableInstance, TagInstance, Value,
};
use log::debug;
use std::sync::Arc;

type Resolver<'a> = dyn Fn(&str, &str) -> Option<ExternVal> + 'a;

/// Instantiate `module`, resolving imports through `resolver`.
pub(crate) fn instantiate(
    ex: &Executor,
    resolver: &Resolver<'_>,
    module: &Module,
) -> Result<Arc<ModuleInstance>, InstantiateError> {
    let inst = ModuleInstance::new(module.types.clone());

    resolve_imports(resolver, module, &inst)?;
    allocate_functions(module, &inst)?;
    allocate_tables(ex, module, &inst)?;
    allocate_memories(ex, module, &inst)?;
    allocate_tags(module, &inst)?;
    allocate_globals(ex, module, &inst)?;
    allocate_elements(ex, module, &inst)?;
    allocate_data(ex, module, &inst)?;
    build_exports(module, &inst)?;
    run_start(ex, module, &inst)?;

    Ok(inst)
}

fn incompatible(import: &crate::ast::Import, expected: String, actual: String) -> InstantiateError {
    InstantiateError::IncompatibleImportType {
        module: import.module.clone(),
        name: import.name.clone(),
        expected,
        actual,
    }
}

/// Step 1: resolve every import by `(module, field)` and check kind and
/// type compatibility before anything is allocated.
fn resolve_imports(
    resolver: &Resolver<'_>,
    module: &Module,
    inst: &Arc<ModuleInstance>,
) -> Result<(), InstantiateError> {
    for import in &module.imports {
        let supplied = resolver(&import.module, &import.name).ok_or_else(|| InstantiateError::UndefinedImport {
            module: import.module.clone(),
            name: import.name.clone(),
        })?;
        debug!("import {}.{} resolved ({})", import.module, import.name, supplied.kind_name());
        match (&import.desc, supplied) {
            (ImportDesc::Func { type_idx }, ExternVal::Func(f)) => {
                let want = inst
                    .func_type(*type_idx)
                    .ok_or_else(|| InstantiateError::ValidationFailed("import type index".to_string()))?;
                if !typing::func_type_equal(f.ty(), f.types(), &want, inst.types()) {
                    return Err(incompatible(import, want.to_string(), f.ty().to_string()));
                }
                inst.push_func(f);
            }
            (ImportDesc::Table(want), ExternVal::Table(t)) => {
                let have = t.ty();
                if have.elem != want.elem || !want.limits.is_satisfied_by(&have.limits) {
                    return Err(incompatible(import, format!("{want:?}"), format!("{have:?}")));
                }
                inst.push_table(t);
            }
            (ImportDesc::Memory(want), ExternVal::Memory(m)) => {
                let have = m.ty();
                if !want.limits.is_satisfied_by(&have.limits) {
                    return Err(incompatible(import, format!("{want:?}"), format!("{have:?}")));
                }
                inst.push_memory(m);
            }
            (ImportDesc::Global(want), ExternVal::Global(g)) => {
                let have = g.ty();
                if have.value != want.value || have.mutable != want.mutable {
                    return Err(incompatible(import, format!("{want:?}"), format!("{have:?}")));
                }
                inst.push_global(g);
            }
            (ImportDesc::Tag(want), ExternVal::Tag(t)) => {
                let want_sig = inst
                    .func_type(want.type_idx)
                    .ok_or_else(|| InstantiateError::ValidationFailed("tag type index".to_string()))?;
                if !typing::func_type_equal(&t.sig, &[], &want_sig, inst.types()) {
                    return Err(incompatible(import, want_sig.to_string(), t.sig.to_string()));
                }
                inst.push_tag(t);
            }
            (desc, other) => {
                return Err(incompatible(
                    import,
                    format!("{:?}", desc.kind()),
                    other.kind_name().to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Step 2: allocate the module's own functions from the function and
/// code sections.
fn allocate_functions(module: &Module, inst: &Arc<ModuleInstance>) -> Result<(), InstantiateError> {
    let imported = module.import_count(ExternalKind::Func) as u32;
    for (i, type_idx) in module.funcs.iter().enumerate() {
        let body = module
            .code
            .get(i)
            .ok_or_else(|| InstantiateError::ValidationFailed("missing code entry".to_string()))?;
        let ty = inst
            .func_type(*type_idx)
            .ok_or_else(|| InstantiateError::ValidationFailed("function type index".to_string()))?;
        let func = FunctionInstance::new_wasm(
            Arc::downgrade(inst),
            inst.types().clone(),
            *type_idx,
            imported + i as u32,
            ty,
            &body.locals,
            body.body.clone(),
        );
        inst.push_func(Arc::new(func));
    }
    debug!("allocated {} function(s)", module.funcs.len());
    Ok(())
}

fn default_table_ref(inst: &ModuleInstance, ty: &TableType) -> Ref {
    Ref::Null(bottom_of(inst, ty.elem.heap))
}

/// Step 3: allocate tables, evaluating initializer expressions on a
/// transient stack where declared.
fn allocate_tables(ex: &Executor, module: &Module, inst: &Arc<ModuleInstance>) -> Result<(), InstantiateError> {
    for decl in &module.tables {
        let init = match &decl.init {
            Some(expr) => match engine::run_expression(ex, inst, expr).map_err(InstantiateError::Init)? {
                Value::Ref(r) => r,
                _ => return Err(InstantiateError::ValidationFailed("table initializer type".to_string())),
            },
            None => default_table_ref(inst, &decl.ty),
        };
        let table =
            TableInstance::new(decl.ty, init, ex.config.max_table_size).map_err(InstantiateError::Init)?;
        inst.push_table(Arc::new(table));
    }
    Ok(())
}

/// Step 4: allocate memories.
fn allocate_memories(ex: &Executor, module: &Module, inst: &Arc<ModuleInstance>) -> Result<(), InstantiateError> {
    for ty in &module.memories {
        let mem = MemoryInstance::new(*ty, ex.config.max_memory_pages).map_err(InstantiateError::Init)?;
        inst.push_memory(Arc::new(mem));
    }
    Ok(())
}

/// Step 5: allocate exception tags.
fn allocate_tags(module: &Module, inst: &Arc<ModuleInstance>) -> Result<(), InstantiateError> {
    for ty in &module.tags {
        let sig = inst
            .func_type(ty.type_idx)
            .ok_or_else(|| InstantiateError::ValidationFailed("tag type index".to_string()))?;
        inst.push_tag(Arc::new(TagInstance::new(*ty, sig)));
    }
    Ok(())
}

/// Step 6: allocate globals. Each initializer may only read imports and
/// previously defined globals, which the growing index space provides.
fn allocate_globals(ex: &Executor, module: &Module, inst: &Arc<ModuleInstance>) -> Result<(), InstantiateError> {
    for decl in &module.globals {
        let value = engine::run_expression(ex, inst, &decl.init).map_err(InstantiateError::Init)?;
        inst.push_global(Arc::new(GlobalInstance::new(decl.ty, value)));
    }
    Ok(())
}

/// Steps 7 and 8 (tables): allocate element instances and copy active
/// segments into their tables, trapping on out-of-range before any slot
/// is written.
fn allocate_elements(ex: &Executor, module: &Module, inst: &Arc<ModuleInstance>) -> Result<(), InstantiateError> {
    for segment in &module.elements {
        let mut refs = Vec::with_capacity(segment.items.len());
        for item in &segment.items {
            match engine::run_expression(ex, inst, item).map_err(InstantiateError::Init)? {
                Value::Ref(r) => refs.push(r),
                _ => return Err(InstantiateError::ValidationFailed("element item type".to_string())),
            }
        }
        let elem = Arc::new(ElementInstance::new(segment.elem_type, refs));

        match &segment.mode {
            ElementMode::Passive => {}
            ElementMode::Declarative => elem.drop_elem(),
            ElementMode::Active { table_idx, offset } => {
                let offset = engine::run_expression(ex, inst, offset)
                    .map_err(InstantiateError::Init)?
                    .as_i32()
                    .ok_or_else(|| InstantiateError::ValidationFailed("element offset type".to_string()))?
                    as u32;
                let table = inst
                    .table(*table_idx)
                    .ok_or(InstantiateError::ElementSegmentOutOfRange)?;
                let refs = elem.slice(0, elem.len()).map_err(|_| InstantiateError::ElementSegmentOutOfRange)?;
                table
                    .init(offset, &refs)
                    .map_err(|_| InstantiateError::ElementSegmentOutOfRange)?;
                elem.drop_elem();
            }
        }
        inst.push_elem(elem);
    }
    debug!("allocated {} element segment(s)", module.elements.len());
    Ok(())
}

/// Steps 9 and 10 (memories): allocate data instances and copy active
/// segments into their memories.
fn allocate_data(ex: &Executor, module: &Module, inst: &Arc<ModuleInstance>) -> Result<(), InstantiateError> {
    for segment in &module.datas {
        let data = Arc::new(DataInstance::new(segment.bytes.clone()));

        if let DataMode::Active { memory_idx, offset } = &segment.mode {
            let offset = engine::run_expression(ex, inst, offset)
                .map_err(InstantiateError::Init)?
                .as_i32()
                .ok_or_else(|| InstantiateError::ValidationFailed("data offset type".to_string()))?
                as u32;
            let mem = inst
                .memory(*memory_idx)
                .ok_or(InstantiateError::DataSegmentOutOfRange)?;
            mem.write_bytes(offset, &segment.bytes)
                .map_err(|_| InstantiateError::DataSegmentOutOfRange)?;
            data.drop_data();
        }
        inst.push_data(data);
    }
    Ok(())
}

/// Step 11: publish the export table.
fn build_exports(module: &Module, inst: &Arc<ModuleInstance>) -> Result<(), InstantiateError> {
    for export in &module.exports {
        let value = match export.kind {
            ExternalKind::Func => inst.func(export.index).map(ExternVal::Func),
            ExternalKind::Table => inst.table(export.index).map(ExternVal::Table),
            ExternalKind::Memory => inst.memory(export.index).map(ExternVal::Memory),
            ExternalKind::Global => inst.global(export.index).map(ExternVal::Global),
            ExternalKind::Tag => inst.tag(export.index).map(ExternVal::Tag),
        }
        .ok_or_else(|| InstantiateError::ValidationFailed(format!("export index for {}", export.name)))?;
        inst.add_export(&export.name, value);
    }
    Ok(())
}

/// Step 12: run the start function; a trap aborts the instantiation.
fn run_start(ex: &Executor, module: &Module, inst: &Arc<ModuleInstance>) -> Result<(), InstantiateError> {
    if let Some(start_idx) = module.start {
        let func = inst
            .func(start_idx)
            .ok_or_else(|| InstantiateError::ValidationFailed("start function index".to_string()))?;
        inst.set_start(func.clone());
        debug!("running start function {start_idx}");
        let mut stack = StackManager::new();
        ex.run_function(&mut stack, &func, Vec::new())
            .map_err(InstantiateError::StartFunctionFailed)?;
    }
    Ok(())
}
