//! Memory operations
//!
//! Loads, stores, and the bulk memory family (WebAssembly specification
//! section 4.4.7). The effective address is the dynamic base plus the
//! static offset, computed at 64-bit width so a 33-bit overflow is
//! detected and traps. Bulk operations validate their whole range before
//! any byte is written.

use crate::ast::instruction::{Instruction, MemArg};
use crate::runtime::{MemoryInstance, ModuleInstance, StackManager, Trap, Value};

/// Effective address of an access: base + static offset, trapping on
/// 32-bit overflow.
#[inline]
pub(crate) fn effective_address(base: i32, memarg: &MemArg) -> Result<u32, Trap> {
    let ea = base as u32 as u64 + memarg.offset as u64;
    if ea > u32::MAX as u64 {
        return Err(Trap::OutOfBoundsMemAccess);
    }
    Ok(ea as u32)
}

fn resolve(module: &ModuleInstance, idx: u32) -> Result<std::sync::Arc<MemoryInstance>, Trap> {
    module.memory(idx).ok_or(Trap::OutOfBoundsMemAccess)
}

// ===== Loads (4.4.7.1) =====

macro_rules! load {
    ($name:ident, $read:ident, $variant:ident, $conv:ty) => {
        pub fn $name(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
            let base = stack.pop_i32()?;
            let ea = effective_address(base, memarg)?;
            let raw = mem.$read(ea)?;
            stack.push(Value::$variant(raw as $conv as _));
            Ok(())
        }
    };
}

load!(i32_load, read_u32, I32, i32);
load!(i64_load, read_u64, I64, i64);
load!(i32_load8_s, read_u8, I32, i8);
load!(i32_load8_u, read_u8, I32, u8);
load!(i32_load16_s, read_u16, I32, i16);
load!(i32_load16_u, read_u16, I32, u16);
load!(i64_load8_s, read_u8, I64, i8);
load!(i64_load8_u, read_u8, I64, u8);
load!(i64_load16_s, read_u16, I64, i16);
load!(i64_load16_u, read_u16, I64, u16);
load!(i64_load32_s, read_u32, I64, i32);
load!(i64_load32_u, read_u32, I64, u32);

pub fn f32_load(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let ea = effective_address(base, memarg)?;
    stack.push(Value::F32(f32::from_bits(mem.read_u32(ea)?)));
    Ok(())
}

pub fn f64_load(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let ea = effective_address(base, memarg)?;
    stack.push(Value::F64(f64::from_bits(mem.read_u64(ea)?)));
    Ok(())
}

// ===== Stores (4.4.7.2) =====

macro_rules! store {
    ($name:ident, $pop:ident, $write:ident, $narrow:ty) => {
        pub fn $name(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
            let value = stack.$pop()?;
            let base = stack.pop_i32()?;
            let ea = effective_address(base, memarg)?;
            mem.$write(ea, value as $narrow)
        }
    };
}

store!(i32_store, pop_i32, write_u32, u32);
store!(i64_store, pop_i64, write_u64, u64);
store!(i32_store8, pop_i32, write_u8, u8);
store!(i32_store16, pop_i32, write_u16, u16);
store!(i64_store8, pop_i64, write_u8, u8);
store!(i64_store16, pop_i64, write_u16, u16);
store!(i64_store32, pop_i64, write_u32, u32);

pub fn f32_store(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
    let value = stack.pop_f32()?;
    let base = stack.pop_i32()?;
    let ea = effective_address(base, memarg)?;
    mem.write_u32(ea, value.to_bits())
}

pub fn f64_store(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
    let value = stack.pop_f64()?;
    let base = stack.pop_i32()?;
    let ea = effective_address(base, memarg)?;
    mem.write_u64(ea, value.to_bits())
}

// ===== Size and grow (4.4.7.3, 4.4.7.4) =====

pub fn memory_size(stack: &mut StackManager, mem: &MemoryInstance) -> Result<(), Trap> {
    stack.push(Value::I32(mem.size() as i32));
    Ok(())
}

/// memory.grow pushes the previous size, or -1 (0xFFFFFFFF) when growth
/// fails; the memory is unchanged on failure.
pub fn memory_grow(stack: &mut StackManager, mem: &MemoryInstance) -> Result<(), Trap> {
    let delta = stack.pop_i32()? as u32;
    match mem.grow(delta) {
        Some(prev) => stack.push(Value::I32(prev as i32)),
        None => stack.push(Value::I32(-1)),
    }
    Ok(())
}

// ===== Bulk memory (4.4.7.5..) =====

pub fn memory_init(
    stack: &mut StackManager,
    mem: &MemoryInstance,
    data: &crate::runtime::DataInstance,
) -> Result<(), Trap> {
    let len = stack.pop_i32()? as u32;
    let src = stack.pop_i32()? as u32;
    let dst = stack.pop_i32()? as u32;
    // Source range is validated by the slice, destination by the write;
    // the copy happens only after both checks pass.
    let bytes = data.slice(src, len)?;
    if (dst as u64 + len as u64) > mem.byte_len() as u64 {
        return Err(Trap::OutOfBoundsMemAccess);
    }
    mem.write_bytes(dst, &bytes)
}

pub fn memory_copy(
    stack: &mut StackManager,
    dst_mem: &MemoryInstance,
    src_mem: &MemoryInstance,
) -> Result<(), Trap> {
    let len = stack.pop_i32()? as u32;
    let src = stack.pop_i32()? as u32;
    let dst = stack.pop_i32()? as u32;
    MemoryInstance::copy_between(dst_mem, dst, src_mem, src, len as usize)
}

pub fn memory_fill(stack: &mut StackManager, mem: &MemoryInstance) -> Result<(), Trap> {
    let len = stack.pop_i32()? as u32;
    let value = stack.pop_i32()? as u8;
    let dst = stack.pop_i32()? as u32;
    mem.fill(dst, value, len as usize)
}

pub fn data_drop(data: &crate::runtime::DataInstance) -> Result<(), Trap> {
    data.drop_data();
    Ok(())
}

/// Dispatch a memory instruction, or `None` if `instr` is outside this
/// family.
pub fn run(instr: &Instruction, stack: &mut StackManager, module: &ModuleInstance) -> Option<Result<(), Trap>> {
    use Instruction::*;
    let result = match instr {
        I32Load { memarg } => resolve(module, memarg.memory).and_then(|m| i32_load(stack, &m, memarg)),
        I64Load { memarg } => resolve(module, memarg.memory).and_then(|m| i64_load(stack, &m, memarg)),
        F32Load { memarg } => resolve(module, memarg.memory).and_then(|m| f32_load(stack, &m, memarg)),
        F64Load { memarg } => resolve(module, memarg.memory).and_then(|m| f64_load(stack, &m, memarg)),
        I32Load8S { memarg } => resolve(module, memarg.memory).and_then(|m| i32_load8_s(stack, &m, memarg)),
        I32Load8U { memarg } => resolve(module, memarg.memory).and_then(|m| i32_load8_u(stack, &m, memarg)),
        I32Load16S { memarg } => resolve(module, memarg.memory).and_then(|m| i32_load16_s(stack, &m, memarg)),
        I32Load16U { memarg } => resolve(module, memarg.memory).and_then(|m| i32_load16_u(stack, &m, memarg)),
        I64Load8S { memarg } => resolve(module, memarg.memory).and_then(|m| i64_load8_s(stack, &m, memarg)),
        I64Load8U { memarg } => resolve(module, memarg.memory).and_then(|m| i64_load8_u(stack, &m, memarg)),
        I64Load16S { memarg } => resolve(module, memarg.memory).and_then(|m| i64_load16_s(stack, &m, memarg)),
        I64Load16U { memarg } => resolve(module, memarg.memory).and_then(|m| i64_load16_u(stack, &m, memarg)),
        I64Load32S { memarg } => resolve(module, memarg.memory).and_then(|m| i64_load32_s(stack, &m, memarg)),
        I64Load32U { memarg } => resolve(module, memarg.memory).and_then(|m| i64_load32_u(stack, &m, memarg)),
        I32Store { memarg } => resolve(module, memarg.memory).and_then(|m| i32_store(stack, &m, memarg)),
        I64Store { memarg } => resolve(module, memarg.memory).and_then(|m| i64_store(stack, &m, memarg)),
        F32Store { memarg } => resolve(module, memarg.memory).and_then(|m| f32_store(stack, &m, memarg)),
        F64Store { memarg } => resolve(module, memarg.memory).and_then(|m| f64_store(stack, &m, memarg)),
        I32Store8 { memarg } => resolve(module, memarg.memory).and_then(|m| i32_store8(stack, &m, memarg)),
        I32Store16 { memarg } => resolve(module, memarg.memory).and_then(|m| i32_store16(stack, &m, memarg)),
        I64Store8 { memarg } => resolve(module, memarg.memory).and_then(|m| i64_store8(stack, &m, memarg)),
        I64Store16 { memarg } => resolve(module, memarg.memory).and_then(|m| i64_store16(stack, &m, memarg)),
        I64Store32 { memarg } => resolve(module, memarg.memory).and_then(|m| i64_store32(stack, &m, memarg)),
        MemorySize { memory } => resolve(module, *memory).and_then(|m| memory_size(stack, &m)),
        MemoryGrow { memory } => resolve(module, *memory).and_then(|m| memory_grow(stack, &m)),
        MemoryInit { data_idx, memory } => resolve(module, *memory).and_then(|m| {
            let data = module.data(*data_idx).ok_or(Trap::OutOfBoundsMemAccess)?;
            memory_init(stack, &m, &data)
        }),
        MemoryCopy { dst_memory, src_memory } => resolve(module, *dst_memory).and_then(|dst| {
            let src = resolve(module, *src_memory)?;
            memory_copy(stack, &dst, &src)
        }),
        MemoryFill { memory } => resolve(module, *memory).and_then(|m| memory_fill(stack, &m)),
        DataDrop { data_idx } => module
            .data(*data_idx)
            .ok_or(Trap::OutOfBoundsMemAccess)
            .and_then(|d| data_drop(&d)),
        _ => return None,
    };
    Some(result)
}
