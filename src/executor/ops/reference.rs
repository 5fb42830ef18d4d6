//! Reference operations
//!
//! Null handling, function references, reference equality, the dynamic
//! cast family (`ref.test` / `ref.cast`), i31 boxing, and the conversions
//! between the extern and any hierarchies.

use crate::ast::instruction::Instruction;
use crate::ast::types::{CompositeType, HeapType, RefType};
use crate::runtime::typing;
use crate::runtime::{ModuleInstance, Ref, StackManager, Trap, Value};

/// Map a heap type to the bottom of its hierarchy, resolving concrete
/// type indices through the module's type table.
pub(crate) fn bottom_of(module: &ModuleInstance, heap: HeapType) -> HeapType {
    match heap {
        HeapType::Type(idx) => match module.sub_type(idx).map(|s| &s.composite) {
            Some(CompositeType::Func(_)) => HeapType::NoFunc,
            Some(CompositeType::Struct(_)) | Some(CompositeType::Array(_)) => HeapType::None,
            None => HeapType::None,
        },
        other => other.bottom(),
    }
}

/// ref.null: push a null reference of the heap type's bottom.
pub fn ref_null(stack: &mut StackManager, module: &ModuleInstance, heap: HeapType) -> Result<(), Trap> {
    stack.push(Value::Ref(Ref::Null(bottom_of(module, heap))));
    Ok(())
}

pub fn ref_is_null(stack: &mut StackManager) -> Result<(), Trap> {
    let r = stack.pop_ref()?;
    stack.push(Value::I32(if r.is_null() { 1 } else { 0 }));
    Ok(())
}

pub fn ref_func(stack: &mut StackManager, module: &ModuleInstance, func_idx: u32) -> Result<(), Trap> {
    let f = module.func(func_idx).ok_or(Trap::Unreachable)?;
    stack.push(Value::Ref(Ref::Func(f)));
    Ok(())
}

/// ref.eq compares referent identity; null references are equal.
pub fn ref_eq(stack: &mut StackManager) -> Result<(), Trap> {
    let b = stack.pop_ref()?;
    let a = stack.pop_ref()?;
    stack.push(Value::I32(if Ref::identity_eq(&a, &b) { 1 } else { 0 }));
    Ok(())
}

pub fn ref_as_non_null(stack: &mut StackManager) -> Result<(), Trap> {
    let r = stack.pop_ref()?;
    if r.is_null() {
        return Err(Trap::AccessNullRef);
    }
    stack.push(Value::Ref(r));
    Ok(())
}

/// ref.test: 1 when the operand's run-time type is a subtype of the
/// target, 0 otherwise.
pub fn ref_test(stack: &mut StackManager, module: &ModuleInstance, target: &RefType) -> Result<(), Trap> {
    let r = stack.pop_ref()?;
    let hit = typing::ref_matches(&r, target, module.types());
    stack.push(Value::I32(if hit { 1 } else { 0 }));
    Ok(())
}

/// ref.cast: the operand passes through unchanged when the test holds,
/// otherwise the cast traps.
pub fn ref_cast(stack: &mut StackManager, module: &ModuleInstance, target: &RefType) -> Result<(), Trap> {
    let r = stack.pop_ref()?;
    if !typing::ref_matches(&r, target, module.types()) {
        return Err(Trap::CastFailed);
    }
    stack.push(Value::Ref(r));
    Ok(())
}

/// ref.i31 boxes the low 31 bits of an i32.
pub fn ref_i31(stack: &mut StackManager) -> Result<(), Trap> {
    let v = stack.pop_i32()?;
    stack.push(Value::Ref(Ref::I31(v as u32 & 0x7FFF_FFFF)));
    Ok(())
}

pub fn i31_get_s(stack: &mut StackManager) -> Result<(), Trap> {
    match stack.pop_ref()? {
        Ref::Null(_) => Err(Trap::AccessNullRef),
        Ref::I31(v) => {
            // Sign-extend from 31 bits.
            stack.push(Value::I32(((v << 1) as i32) >> 1));
            Ok(())
        }
        _ => Err(Trap::Unreachable),
    }
}

pub fn i31_get_u(stack: &mut StackManager) -> Result<(), Trap> {
    match stack.pop_ref()? {
        Ref::Null(_) => Err(Trap::AccessNullRef),
        Ref::I31(v) => {
            stack.push(Value::I32(v as i32));
            Ok(())
        }
        _ => Err(Trap::Unreachable),
    }
}

/// any.convert_extern: an extern reference enters the any hierarchy.
/// The representation is shared, only null changes its hierarchy tag.
pub fn any_convert_extern(stack: &mut StackManager) -> Result<(), Trap> {
    let r = stack.pop_ref()?;
    let converted = match r {
        Ref::Null(_) => Ref::Null(HeapType::None),
        other => other,
    };
    stack.push(Value::Ref(converted));
    Ok(())
}

/// extern.convert_any: the inverse direction.
pub fn extern_convert_any(stack: &mut StackManager) -> Result<(), Trap> {
    let r = stack.pop_ref()?;
    let converted = match r {
        Ref::Null(_) => Ref::Null(HeapType::NoExtern),
        other => other,
    };
    stack.push(Value::Ref(converted));
    Ok(())
}

/// Dispatch a reference instruction, or `None` if `instr` is outside
/// this family.
pub fn run(instr: &Instruction, stack: &mut StackManager, module: &ModuleInstance) -> Option<Result<(), Trap>> {
    use Instruction::*;
    Some(match instr {
        RefNull { heap } => ref_null(stack, module, *heap),
        RefIsNull => ref_is_null(stack),
        RefFunc { func_idx } => ref_func(stack, module, *func_idx),
        RefEq => ref_eq(stack),
        RefAsNonNull => ref_as_non_null(stack),
        RefTest { ty } => ref_test(stack, module, ty),
        RefCast { ty } => ref_cast(stack, module, ty),
        RefI31 => ref_i31(stack),
        I31GetS => i31_get_s(stack),
        I31GetU => i31_get_u(stack),
        AnyConvertExtern => any_convert_extern(stack),
        ExternConvertAny => extern_convert_any(stack),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_with(values: &[Value]) -> StackManager {
        let mut stack = StackManager::new();
        stack.push_all(values.iter().cloned());
        stack
    }

    #[test]
    fn test_i31_roundtrip() {
        // Negative value: boxing keeps 31 bits, signed unboxing restores
        let mut s = stack_with(&[Value::I32(-5)]);
        ref_i31(&mut s).unwrap();
        i31_get_s(&mut s).unwrap();
        assert_eq!(s.pop_i32().unwrap(), -5);

        // Unsigned unboxing zero-extends
        let mut s = stack_with(&[Value::I32(-5)]);
        ref_i31(&mut s).unwrap();
        i31_get_u(&mut s).unwrap();
        assert_eq!(s.pop_i32().unwrap(), 0x7FFF_FFFB);
    }

    #[test]
    fn test_null_checks() {
        let mut s = stack_with(&[Value::Ref(Ref::null_func())]);
        ref_is_null(&mut s).unwrap();
        assert_eq!(s.pop_i32().unwrap(), 1);

        let mut s = stack_with(&[Value::Ref(Ref::null_func())]);
        assert_eq!(ref_as_non_null(&mut s), Err(Trap::AccessNullRef));

        let mut s = stack_with(&[Value::Ref(Ref::null_extern())]);
        assert_eq!(i31_get_s(&mut s), Err(Trap::AccessNullRef));
    }

    #[test]
    fn test_cast_traps_where_test_reports_zero() {
        let module = ModuleInstance::new(Vec::new());
        let target = RefType::new(false, HeapType::Struct);
        let mut s = stack_with(&[Value::Ref(Ref::I31(1))]);
        ref_test(&mut s, &module, &target).unwrap();
        assert_eq!(s.pop_i32().unwrap(), 0);

        let mut s = stack_with(&[Value::Ref(Ref::I31(1))]);
        assert_eq!(ref_cast(&mut s, &module, &target), Err(Trap::CastFailed));
    }

    #[test]
    fn test_hierarchy_conversions() {
        let mut s = stack_with(&[Value::Ref(Ref::Null(HeapType::NoExtern))]);
        any_convert_extern(&mut s).unwrap();
        assert!(matches!(s.pop_ref().unwrap(), Ref::Null(HeapType::None)));

        let mut s = stack_with(&[Value::Ref(Ref::Null(HeapType::None))]);
        extern_convert_any(&mut s).unwrap();
        assert!(matches!(s.pop_ref().unwrap(), Ref::Null(HeapType::NoExtern)));
    }
}
