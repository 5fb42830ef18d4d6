//! Runtime type relations
//!
//! Structural equality and subtyping over defined types, resolved through
//! each side's own type table so cross-module references compare by shape
//! rather than by index. Recursive type groups are handled coinductively:
//! a pair of types already under comparison is assumed equal, which is
//! exactly the canonical-form equivalence the instruction semantics
//! require for `call_indirect` and the cast family.

use crate::ast::types::{FunctionType, HeapType, RefType, StorageType, SubType, ValueType};
use crate::runtime::func::FunctionInstance;
use crate::runtime::gc;
use crate::runtime::value::Ref;
use std::collections::HashSet;

type Assumed = HashSet<(u32, u32)>;

/// Structural equality of two defined types, each resolved against its
/// own type table.
pub fn composite_equal(a_idx: u32, a_types: &[SubType], b_idx: u32, b_types: &[SubType]) -> bool {
    let mut assumed = Assumed::new();
    comp_eq(a_idx, a_types, b_idx, b_types, &mut assumed)
}

fn comp_eq(a_idx: u32, a_types: &[SubType], b_idx: u32, b_types: &[SubType], assumed: &mut Assumed) -> bool {
    if std::ptr::eq(a_types.as_ptr(), b_types.as_ptr()) && a_idx == b_idx {
        return true;
    }
    let (a, b) = match (a_types.get(a_idx as usize), b_types.get(b_idx as usize)) {
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };
    if !assumed.insert((a_idx, b_idx)) {
        // Already under comparison: assume equal (coinduction).
        return true;
    }
    use crate::ast::types::CompositeType::*;
    match (&a.composite, &b.composite) {
        (Func(fa), Func(fb)) => func_eq(fa, a_types, fb, b_types, assumed),
        (Struct(fa), Struct(fb)) => {
            fa.len() == fb.len()
                && fa
                    .iter()
                    .zip(fb)
                    .all(|(x, y)| x.mutable == y.mutable && storage_eq(x.storage, a_types, y.storage, b_types, assumed))
        }
        (Array(fa), Array(fb)) => {
            fa.mutable == fb.mutable && storage_eq(fa.storage, a_types, fb.storage, b_types, assumed)
        }
        _ => false,
    }
}

fn func_eq(
    a: &FunctionType,
    a_types: &[SubType],
    b: &FunctionType,
    b_types: &[SubType],
    assumed: &mut Assumed,
) -> bool {
    a.params.len() == b.params.len()
        && a.results.len() == b.results.len()
        && a
            .params
            .iter()
            .zip(&b.params)
            .all(|(x, y)| value_type_eq(*x, a_types, *y, b_types, assumed))
        && a
            .results
            .iter()
            .zip(&b.results)
            .all(|(x, y)| value_type_eq(*x, a_types, *y, b_types, assumed))
}

fn value_type_eq(a: ValueType, a_types: &[SubType], b: ValueType, b_types: &[SubType], assumed: &mut Assumed) -> bool {
    match (a, b) {
        (ValueType::Ref(ra), ValueType::Ref(rb)) => {
            ra.nullable == rb.nullable && heap_eq(ra.heap, a_types, rb.heap, b_types, assumed)
        }
        _ => a == b,
    }
}

fn storage_eq(a: StorageType, a_types: &[SubType], b: StorageType, b_types: &[SubType], assumed: &mut Assumed) -> bool {
    match (a, b) {
        (StorageType::Val(x), StorageType::Val(y)) => value_type_eq(x, a_types, y, b_types, assumed),
        _ => a == b,
    }
}

fn heap_eq(a: HeapType, a_types: &[SubType], b: HeapType, b_types: &[SubType], assumed: &mut Assumed) -> bool {
    match (a, b) {
        (HeapType::Type(i), HeapType::Type(j)) => comp_eq(i, a_types, j, b_types, assumed),
        _ => a == b,
    }
}

/// Whether defined type `a` is a subtype of defined type `b`: structurally
/// equal, or reachable from `a` through its declared supertype chain.
pub fn concrete_is_subtype(a_idx: u32, a_types: &[SubType], b_idx: u32, b_types: &[SubType]) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![a_idx];
    while let Some(idx) = stack.pop() {
        if !visited.insert(idx) {
            continue;
        }
        if composite_equal(idx, a_types, b_idx, b_types) {
            return true;
        }
        if let Some(sub) = a_types.get(idx as usize) {
            stack.extend(sub.supertypes.iter().copied());
        }
    }
    false
}

/// Whether two function signatures are structurally identical, resolving
/// type-index references through the respective tables. Used for import
/// matching.
pub fn func_type_equal(a: &FunctionType, a_types: &[SubType], b: &FunctionType, b_types: &[SubType]) -> bool {
    let mut assumed = Assumed::new();
    func_eq(a, a_types, b, b_types, &mut assumed)
}

/// Dynamic `ref.test` semantics: does the run-time type of `r` match the
/// target reference type, resolved against `target_types`?
pub fn ref_matches(r: &Ref, target: &RefType, target_types: &[SubType]) -> bool {
    if r.is_null() {
        return target.nullable;
    }
    match target.heap {
        HeapType::Func => matches!(r, Ref::Func(_)),
        HeapType::Extern => matches!(r, Ref::Extern(_)),
        // Extern references converted into the any hierarchy keep their
        // representation, so they match `any` as well.
        HeapType::Any => matches!(r, Ref::Struct(_) | Ref::Array(_) | Ref::I31(_) | Ref::Extern(_)),
        HeapType::Eq => matches!(r, Ref::Struct(_) | Ref::Array(_) | Ref::I31(_)),
        HeapType::I31 => matches!(r, Ref::I31(_)),
        HeapType::Struct => matches!(r, Ref::Struct(_)),
        HeapType::Array => matches!(r, Ref::Array(_)),
        HeapType::Exn => matches!(r, Ref::Exn(_)),
        // No non-null value inhabits a bottom type.
        HeapType::None | HeapType::NoFunc | HeapType::NoExtern => false,
        HeapType::Type(idx) => match r {
            Ref::Func(f) => concrete_is_subtype(f.type_idx(), f.types(), idx, target_types),
            Ref::Struct(g) | Ref::Array(g) => gc::heap()
                .with(*g, |obj| {
                    Ok(concrete_is_subtype(obj.type_idx(), obj.types(), idx, target_types))
                })
                .unwrap_or(false),
            _ => false,
        },
    }
}

/// Signature check for `call_indirect` / `call_ref`: the callee's defined
/// type must be a subtype of the expected type index in the caller's
/// module.
pub fn func_matches_expected(f: &FunctionInstance, expect_idx: u32, expect_types: &[SubType]) -> bool {
    if f.types().is_empty() {
        // Host function: compare the bare signature against the expected
        // function type's shape.
        return expect_types
            .get(expect_idx as usize)
            .and_then(|s| s.composite.as_func())
            .map(|want| func_type_equal(f.ty(), &[], want, expect_types))
            .unwrap_or(false);
    }
    concrete_is_subtype(f.type_idx(), f.types(), expect_idx, expect_types)
}
