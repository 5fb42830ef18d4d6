//! GC struct and array operations
//!
//! Allocation, field access, and the array bulk family. Packed i8/i16
//! storage is masked on write and sign- or zero-extended on read. Array
//! allocation validates the requested length against the configured hard
//! maximum, and the `_data`/`_elem` variants validate segment bounds
//! before any element is produced.

use crate::ast::instruction::Instruction;
use crate::ast::types::{CompositeType, FieldType, StorageType, ValueType};
use crate::executor::Config;
use crate::runtime::gc::{self, GcObject};
use crate::runtime::value::{pack, unpack};
use crate::runtime::{GcRef, ModuleInstance, Ref, StackManager, Trap, Value};

fn struct_fields(module: &ModuleInstance, type_idx: u32) -> Result<Vec<FieldType>, Trap> {
    match module.sub_type(type_idx).map(|s| &s.composite) {
        Some(CompositeType::Struct(fields)) => Ok(fields.clone()),
        _ => Err(Trap::Unreachable),
    }
}

fn array_field(module: &ModuleInstance, type_idx: u32) -> Result<FieldType, Trap> {
    match module.sub_type(type_idx).map(|s| &s.composite) {
        Some(CompositeType::Array(field)) => Ok(*field),
        _ => Err(Trap::Unreachable),
    }
}

fn pop_struct_ref(stack: &mut StackManager) -> Result<GcRef, Trap> {
    match stack.pop_ref()? {
        Ref::Null(_) => Err(Trap::AccessNullRef),
        Ref::Struct(g) => Ok(g),
        _ => Err(Trap::Unreachable),
    }
}

fn pop_array_ref(stack: &mut StackManager) -> Result<GcRef, Trap> {
    match stack.pop_ref()? {
        Ref::Null(_) => Err(Trap::AccessNullRef),
        Ref::Array(g) => Ok(g),
        _ => Err(Trap::Unreachable),
    }
}

/// Default value of a storage type (packed storage defaults to i32 0).
fn storage_default(storage: StorageType) -> Value {
    match storage {
        StorageType::Val(ty) => Value::default_for(ty),
        StorageType::I8 | StorageType::I16 => Value::I32(0),
    }
}

/// Byte width of one array element with this storage in a data segment.
fn storage_byte_width(storage: StorageType) -> u32 {
    match storage {
        StorageType::I8 => 1,
        StorageType::I16 => 2,
        StorageType::Val(ty) => ty.byte_width(),
    }
}

/// Decode one element from a data segment chunk.
fn read_storage(bytes: &[u8], storage: StorageType) -> Value {
    match storage {
        StorageType::I8 => Value::I32(bytes[0] as i32),
        StorageType::I16 => Value::I32(u16::from_le_bytes([bytes[0], bytes[1]]) as i32),
        StorageType::Val(ValueType::I32) => {
            Value::I32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        StorageType::Val(ValueType::F32) => {
            Value::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        StorageType::Val(ValueType::I64) => Value::I64(i64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ])),
        StorageType::Val(ValueType::F64) => Value::F64(f64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ])),
        StorageType::Val(ValueType::V128) => {
            let mut v = [0u8; 16];
            v.copy_from_slice(&bytes[..16]);
            Value::V128(v)
        }
        // Reference-typed arrays cannot be built from raw bytes.
        StorageType::Val(ValueType::Ref(rt)) => Value::default_for(ValueType::Ref(rt)),
    }
}

// ===== Struct operations =====

pub fn struct_new(stack: &mut StackManager, module: &ModuleInstance, type_idx: u32) -> Result<(), Trap> {
    let fields = struct_fields(module, type_idx)?;
    let values = stack.pop_n(fields.len())?;
    let packed: Vec<Value> = values
        .into_iter()
        .zip(&fields)
        .map(|(v, f)| pack(f.storage, v))
        .collect();
    let r = gc::heap().alloc_struct(type_idx, module.types().clone(), packed);
    stack.push(Value::Ref(Ref::Struct(r)));
    Ok(())
}

pub fn struct_new_default(stack: &mut StackManager, module: &ModuleInstance, type_idx: u32) -> Result<(), Trap> {
    let fields = struct_fields(module, type_idx)?;
    let values: Vec<Value> = fields.iter().map(|f| storage_default(f.storage)).collect();
    let r = gc::heap().alloc_struct(type_idx, module.types().clone(), values);
    stack.push(Value::Ref(Ref::Struct(r)));
    Ok(())
}

pub fn struct_get(
    stack: &mut StackManager,
    module: &ModuleInstance,
    type_idx: u32,
    field: u32,
    signed: bool,
) -> Result<(), Trap> {
    let fields = struct_fields(module, type_idx)?;
    let storage = fields.get(field as usize).ok_or(Trap::Unreachable)?.storage;
    let r = pop_struct_ref(stack)?;
    let raw = gc::heap().with(r, |obj| match obj {
        GcObject::Struct { fields, .. } => fields.get(field as usize).cloned().ok_or(Trap::AccessNullRef),
        GcObject::Array { .. } => Err(Trap::AccessNullRef),
    })?;
    stack.push(unpack(storage, raw, signed));
    Ok(())
}

pub fn struct_set(stack: &mut StackManager, module: &ModuleInstance, type_idx: u32, field: u32) -> Result<(), Trap> {
    let fields = struct_fields(module, type_idx)?;
    let storage = fields.get(field as usize).ok_or(Trap::Unreachable)?.storage;
    let value = stack.pop()?;
    let r = pop_struct_ref(stack)?;
    let packed = pack(storage, value);
    gc::heap().with_mut(r, |obj| match obj {
        GcObject::Struct { fields, .. } => {
            let slot = fields.get_mut(field as usize).ok_or(Trap::AccessNullRef)?;
            *slot = packed;
            Ok(())
        }
        GcObject::Array { .. } => Err(Trap::AccessNullRef),
    })
}

// ===== Array operations =====

fn check_array_len(config: &Config, len: u32) -> Result<(), Trap> {
    if len > config.max_array_size {
        return Err(Trap::OutOfBoundsArrayAccess);
    }
    Ok(())
}

pub fn array_new(
    stack: &mut StackManager,
    module: &ModuleInstance,
    config: &Config,
    type_idx: u32,
) -> Result<(), Trap> {
    let field = array_field(module, type_idx)?;
    let len = stack.pop_i32()? as u32;
    check_array_len(config, len)?;
    let init = pack(field.storage, stack.pop()?);
    let elems = vec![init; len as usize];
    let r = gc::heap().alloc_array(type_idx, module.types().clone(), elems);
    stack.push(Value::Ref(Ref::Array(r)));
    Ok(())
}

pub fn array_new_default(
    stack: &mut StackManager,
    module: &ModuleInstance,
    config: &Config,
    type_idx: u32,
) -> Result<(), Trap> {
    let field = array_field(module, type_idx)?;
    let len = stack.pop_i32()? as u32;
    check_array_len(config, len)?;
    let elems = vec![storage_default(field.storage); len as usize];
    let r = gc::heap().alloc_array(type_idx, module.types().clone(), elems);
    stack.push(Value::Ref(Ref::Array(r)));
    Ok(())
}

pub fn array_new_fixed(
    stack: &mut StackManager,
    module: &ModuleInstance,
    config: &Config,
    type_idx: u32,
    len: u32,
) -> Result<(), Trap> {
    let field = array_field(module, type_idx)?;
    check_array_len(config, len)?;
    let values = stack.pop_n(len as usize)?;
    let elems: Vec<Value> = values.into_iter().map(|v| pack(field.storage, v)).collect();
    let r = gc::heap().alloc_array(type_idx, module.types().clone(), elems);
    stack.push(Value::Ref(Ref::Array(r)));
    Ok(())
}

pub fn array_new_data(
    stack: &mut StackManager,
    module: &ModuleInstance,
    config: &Config,
    type_idx: u32,
    data_idx: u32,
) -> Result<(), Trap> {
    let field = array_field(module, type_idx)?;
    let data = module.data(data_idx).ok_or(Trap::OutOfBoundsMemAccess)?;
    let len = stack.pop_i32()? as u32;
    let src = stack.pop_i32()? as u32;
    check_array_len(config, len)?;
    let width = storage_byte_width(field.storage);
    let total = len.checked_mul(width).ok_or(Trap::OutOfBoundsMemAccess)?;
    let bytes = data.slice(src, total)?;
    let elems: Vec<Value> = bytes
        .chunks_exact(width as usize)
        .map(|chunk| read_storage(chunk, field.storage))
        .collect();
    let r = gc::heap().alloc_array(type_idx, module.types().clone(), elems);
    stack.push(Value::Ref(Ref::Array(r)));
    Ok(())
}

pub fn array_new_elem(
    stack: &mut StackManager,
    module: &ModuleInstance,
    config: &Config,
    type_idx: u32,
    elem_idx: u32,
) -> Result<(), Trap> {
    let elem = module.elem(elem_idx).ok_or(Trap::OutOfBoundsTableAccess)?;
    let len = stack.pop_i32()? as u32;
    let src = stack.pop_i32()? as u32;
    check_array_len(config, len)?;
    let refs = elem.slice(src, len)?;
    let elems: Vec<Value> = refs.into_iter().map(Value::Ref).collect();
    let r = gc::heap().alloc_array(type_idx, module.types().clone(), elems);
    stack.push(Value::Ref(Ref::Array(r)));
    Ok(())
}

pub fn array_get(
    stack: &mut StackManager,
    module: &ModuleInstance,
    type_idx: u32,
    signed: bool,
) -> Result<(), Trap> {
    let field = array_field(module, type_idx)?;
    let idx = stack.pop_i32()? as u32;
    let r = pop_array_ref(stack)?;
    let raw = gc::heap().with(r, |obj| match obj {
        GcObject::Array { elems, .. } => elems.get(idx as usize).cloned().ok_or(Trap::OutOfBoundsArrayAccess),
        GcObject::Struct { .. } => Err(Trap::AccessNullRef),
    })?;
    stack.push(unpack(field.storage, raw, signed));
    Ok(())
}

pub fn array_set(stack: &mut StackManager, module: &ModuleInstance, type_idx: u32) -> Result<(), Trap> {
    let field = array_field(module, type_idx)?;
    let value = stack.pop()?;
    let idx = stack.pop_i32()? as u32;
    let r = pop_array_ref(stack)?;
    let packed = pack(field.storage, value);
    gc::heap().with_mut(r, |obj| match obj {
        GcObject::Array { elems, .. } => {
            let slot = elems.get_mut(idx as usize).ok_or(Trap::OutOfBoundsArrayAccess)?;
            *slot = packed;
            Ok(())
        }
        GcObject::Struct { .. } => Err(Trap::AccessNullRef),
    })
}

pub fn array_len(stack: &mut StackManager) -> Result<(), Trap> {
    let r = pop_array_ref(stack)?;
    let len = gc::heap().array_len(r)?;
    stack.push(Value::I32(len as i32));
    Ok(())
}

pub fn array_fill(stack: &mut StackManager, module: &ModuleInstance, type_idx: u32) -> Result<(), Trap> {
    let field = array_field(module, type_idx)?;
    let len = stack.pop_i32()? as u32;
    let value = stack.pop()?;
    let idx = stack.pop_i32()? as u32;
    let r = pop_array_ref(stack)?;
    let packed = pack(field.storage, value);
    gc::heap().with_mut(r, |obj| match obj {
        GcObject::Array { elems, .. } => {
            let end = idx.checked_add(len).ok_or(Trap::OutOfBoundsArrayAccess)? as usize;
            if end > elems.len() {
                return Err(Trap::OutOfBoundsArrayAccess);
            }
            elems[idx as usize..end].fill(packed);
            Ok(())
        }
        GcObject::Struct { .. } => Err(Trap::AccessNullRef),
    })
}

pub fn array_copy(stack: &mut StackManager) -> Result<(), Trap> {
    let len = stack.pop_i32()? as u32;
    let src_idx = stack.pop_i32()? as u32;
    let src = pop_array_ref(stack)?;
    let dst_idx = stack.pop_i32()? as u32;
    let dst = pop_array_ref(stack)?;
    gc::heap().array_copy(dst, dst_idx, src, src_idx, len)
}

pub fn array_init_data(
    stack: &mut StackManager,
    module: &ModuleInstance,
    type_idx: u32,
    data_idx: u32,
) -> Result<(), Trap> {
    let field = array_field(module, type_idx)?;
    let data = module.data(data_idx).ok_or(Trap::OutOfBoundsMemAccess)?;
    let len = stack.pop_i32()? as u32;
    let src = stack.pop_i32()? as u32;
    let dst_idx = stack.pop_i32()? as u32;
    let r = pop_array_ref(stack)?;
    let width = storage_byte_width(field.storage);
    let total = len.checked_mul(width).ok_or(Trap::OutOfBoundsMemAccess)?;
    let bytes = data.slice(src, total)?;
    gc::heap().with_mut(r, |obj| match obj {
        GcObject::Array { elems, .. } => {
            let end = dst_idx.checked_add(len).ok_or(Trap::OutOfBoundsArrayAccess)? as usize;
            if end > elems.len() {
                return Err(Trap::OutOfBoundsArrayAccess);
            }
            for (i, chunk) in bytes.chunks_exact(width as usize).enumerate() {
                elems[dst_idx as usize + i] = read_storage(chunk, field.storage);
            }
            Ok(())
        }
        GcObject::Struct { .. } => Err(Trap::AccessNullRef),
    })
}

pub fn array_init_elem(
    stack: &mut StackManager,
    module: &ModuleInstance,
    type_idx: u32,
    elem_idx: u32,
) -> Result<(), Trap> {
    let _ = array_field(module, type_idx)?;
    let elem = module.elem(elem_idx).ok_or(Trap::OutOfBoundsTableAccess)?;
    let len = stack.pop_i32()? as u32;
    let src = stack.pop_i32()? as u32;
    let dst_idx = stack.pop_i32()? as u32;
    let r = pop_array_ref(stack)?;
    let refs = elem.slice(src, len)?;
    gc::heap().with_mut(r, |obj| match obj {
        GcObject::Array { elems, .. } => {
            let end = dst_idx.checked_add(len).ok_or(Trap::OutOfBoundsArrayAccess)? as usize;
            if end > elems.len() {
                return Err(Trap::OutOfBoundsArrayAccess);
            }
            for (i, item) in refs.into_iter().enumerate() {
                elems[dst_idx as usize + i] = Value::Ref(item);
            }
            Ok(())
        }
        GcObject::Struct { .. } => Err(Trap::AccessNullRef),
    })
}

/// Dispatch a GC instruction, or `None` if `instr` is outside this
/// family.
pub fn run(
    instr: &Instruction,
    stack: &mut StackManager,
    module: &ModuleInstance,
    config: &Config,
) -> Option<Result<(), Trap>> {
    use Instruction::*;
    Some(match instr {
        StructNew { type_idx } => struct_new(stack, module, *type_idx),
        StructNewDefault { type_idx } => struct_new_default(stack, module, *type_idx),
        StructGet { type_idx, field } => struct_get(stack, module, *type_idx, *field, false),
        StructGetS { type_idx, field } => struct_get(stack, module, *type_idx, *field, true),
        StructGetU { type_idx, field } => struct_get(stack, module, *type_idx, *field, false),
        StructSet { type_idx, field } => struct_set(stack, module, *type_idx, *field),
        ArrayNew { type_idx } => array_new(stack, module, config, *type_idx),
        ArrayNewDefault { type_idx } => array_new_default(stack, module, config, *type_idx),
        ArrayNewFixed { type_idx, len } => array_new_fixed(stack, module, config, *type_idx, *len),
        ArrayNewData { type_idx, data_idx } => array_new_data(stack, module, config, *type_idx, *data_idx),
        ArrayNewElem { type_idx, elem_idx } => array_new_elem(stack, module, config, *type_idx, *elem_idx),
        ArrayGet { type_idx } => array_get(stack, module, *type_idx, false),
        ArrayGetS { type_idx } => array_get(stack, module, *type_idx, true),
        ArrayGetU { type_idx } => array_get(stack, module, *type_idx, false),
        ArraySet { type_idx } => array_set(stack, module, *type_idx),
        ArrayLen => array_len(stack),
        ArrayFill { type_idx } => array_fill(stack, module, *type_idx),
        ArrayCopy { .. } => array_copy(stack),
        ArrayInitData { type_idx, data_idx } => array_init_data(stack, module, *type_idx, *data_idx),
        ArrayInitElem { type_idx, elem_idx } => array_init_elem(stack, module, *type_idx, *elem_idx),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::types::SubType;

    fn module_with_array(storage: StorageType) -> std::sync::Arc<ModuleInstance> {
        ModuleInstance::new(vec![SubType::from_composite(CompositeType::Array(FieldType::new(
            storage, true,
        )))])
    }

    fn stack_with(values: &[Value]) -> StackManager {
        let mut stack = StackManager::new();
        stack.push_all(values.iter().cloned());
        stack
    }

    #[test]
    fn test_array_new_get_set() {
        let module = module_with_array(StorageType::Val(ValueType::I64));
        let config = Config::default();
        let mut s = stack_with(&[Value::I64(7), Value::I32(3)]);
        array_new(&mut s, &module, &config, 0).unwrap();
        let r = s.pop_ref().unwrap();

        let mut s = stack_with(&[Value::Ref(r.clone()), Value::I32(2)]);
        array_get(&mut s, &module, 0, false).unwrap();
        assert_eq!(s.pop_i64().unwrap(), 7);

        let mut s = stack_with(&[Value::Ref(r.clone()), Value::I32(1), Value::I64(-1)]);
        array_set(&mut s, &module, 0).unwrap();
        let mut s = stack_with(&[Value::Ref(r), Value::I32(1)]);
        array_get(&mut s, &module, 0, false).unwrap();
        assert_eq!(s.pop_i64().unwrap(), -1);
    }

    #[test]
    fn test_array_get_out_of_bounds() {
        let module = module_with_array(StorageType::Val(ValueType::I32));
        let config = Config::default();
        let mut s = stack_with(&[Value::I32(0), Value::I32(3)]);
        array_new(&mut s, &module, &config, 0).unwrap();
        let r = s.pop_ref().unwrap();

        let mut s = stack_with(&[Value::Ref(r), Value::I32(3)]);
        assert_eq!(array_get(&mut s, &module, 0, false), Err(Trap::OutOfBoundsArrayAccess));
    }

    #[test]
    fn test_array_length_cap() {
        let module = module_with_array(StorageType::Val(ValueType::I32));
        let config = Config {
            max_array_size: 4,
            ..Config::default()
        };
        let mut s = stack_with(&[Value::I32(0), Value::I32(5)]);
        assert_eq!(
            array_new(&mut s, &module, &config, 0),
            Err(Trap::OutOfBoundsArrayAccess)
        );
    }

    #[test]
    fn test_packed_storage_roundtrip() {
        let module = module_with_array(StorageType::I8);
        let config = Config::default();
        let mut s = stack_with(&[Value::I32(0x1FF), Value::I32(1)]);
        array_new(&mut s, &module, &config, 0).unwrap();
        let r = s.pop_ref().unwrap();

        // Stored masked to 8 bits; signed read extends
        let mut s = stack_with(&[Value::Ref(r.clone()), Value::I32(0)]);
        array_get(&mut s, &module, 0, true).unwrap();
        assert_eq!(s.pop_i32().unwrap(), -1);
        let mut s = stack_with(&[Value::Ref(r), Value::I32(0)]);
        array_get(&mut s, &module, 0, false).unwrap();
        assert_eq!(s.pop_i32().unwrap(), 0xFF);
    }

    #[test]
    fn test_null_array_access_traps() {
        let mut s = stack_with(&[Value::Ref(Ref::Null(crate::ast::types::HeapType::None))]);
        assert_eq!(array_len(&mut s), Err(Trap::AccessNullRef));
    }
}
