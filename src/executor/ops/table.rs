//! Table operations
//!
//! The table access and bulk family (WebAssembly specification section
//! 4.4.6). Bulk operations validate their whole range before any slot is
//! written; `table.grow` pushes the previous size or -1 on failure.

use crate::ast::instruction::Instruction;
use crate::runtime::{ElementInstance, ModuleInstance, StackManager, TableInstance, Trap, Value};

fn resolve(module: &ModuleInstance, idx: u32) -> Result<std::sync::Arc<TableInstance>, Trap> {
    module.table(idx).ok_or(Trap::OutOfBoundsTableAccess)
}

pub fn table_get(stack: &mut StackManager, table: &TableInstance) -> Result<(), Trap> {
    let idx = stack.pop_i32()? as u32;
    let r = table.get(idx)?;
    stack.push(Value::Ref(r));
    Ok(())
}

pub fn table_set(stack: &mut StackManager, table: &TableInstance) -> Result<(), Trap> {
    let r = stack.pop_ref()?;
    let idx = stack.pop_i32()? as u32;
    table.set(idx, r)
}

pub fn table_size(stack: &mut StackManager, table: &TableInstance) -> Result<(), Trap> {
    stack.push(Value::I32(table.size() as i32));
    Ok(())
}

/// table.grow pushes the previous size, or -1 (0xFFFFFFFF) when growth
/// fails; the table is unchanged on failure.
pub fn table_grow(stack: &mut StackManager, table: &TableInstance) -> Result<(), Trap> {
    let delta = stack.pop_i32()? as u32;
    let init = stack.pop_ref()?;
    match table.grow(delta, init) {
        Some(prev) => stack.push(Value::I32(prev as i32)),
        None => stack.push(Value::I32(-1)),
    }
    Ok(())
}

pub fn table_fill(stack: &mut StackManager, table: &TableInstance) -> Result<(), Trap> {
    let len = stack.pop_i32()? as u32;
    let value = stack.pop_ref()?;
    let idx = stack.pop_i32()? as u32;
    table.fill(idx, value, len)
}

pub fn table_copy(stack: &mut StackManager, dst: &TableInstance, src: &TableInstance) -> Result<(), Trap> {
    let len = stack.pop_i32()? as u32;
    let src_idx = stack.pop_i32()? as u32;
    let dst_idx = stack.pop_i32()? as u32;
    dst.copy(dst_idx, src, src_idx, len)
}

pub fn table_init(stack: &mut StackManager, table: &TableInstance, elem: &ElementInstance) -> Result<(), Trap> {
    let len = stack.pop_i32()? as u32;
    let src = stack.pop_i32()? as u32;
    let dst = stack.pop_i32()? as u32;
    // Source range validated by the slice, destination by the init write.
    let refs = elem.slice(src, len)?;
    table.init(dst, &refs)
}

pub fn elem_drop(elem: &ElementInstance) -> Result<(), Trap> {
    elem.drop_elem();
    Ok(())
}

/// Dispatch a table instruction, or `None` if `instr` is outside this
/// family.
pub fn run(instr: &Instruction, stack: &mut StackManager, module: &ModuleInstance) -> Option<Result<(), Trap>> {
    use Instruction::*;
    let result = match instr {
        TableGet { table_idx } => resolve(module, *table_idx).and_then(|t| table_get(stack, &t)),
        TableSet { table_idx } => resolve(module, *table_idx).and_then(|t| table_set(stack, &t)),
        TableSize { table_idx } => resolve(module, *table_idx).and_then(|t| table_size(stack, &t)),
        TableGrow { table_idx } => resolve(module, *table_idx).and_then(|t| table_grow(stack, &t)),
        TableFill { table_idx } => resolve(module, *table_idx).and_then(|t| table_fill(stack, &t)),
        TableCopy { dst_table, src_table } => resolve(module, *dst_table).and_then(|dst| {
            let src = resolve(module, *src_table)?;
            table_copy(stack, &dst, &src)
        }),
        TableInit { elem_idx, table_idx } => resolve(module, *table_idx).and_then(|t| {
            let elem = module.elem(*elem_idx).ok_or(Trap::OutOfBoundsTableAccess)?;
            table_init(stack, &t, &elem)
        }),
        ElemDrop { elem_idx } => module
            .elem(*elem_idx)
            .ok_or(Trap::OutOfBoundsTableAccess)
            .and_then(|e| elem_drop(&e)),
        _ => return None,
    };
    Some(result)
}
