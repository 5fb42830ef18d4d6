//! WebAssembly table instances
//!
//! Tables are typed vectors of references. They are security-critical
//! because they back indirect calls: every access is bounds-checked and
//! `call_indirect` re-checks the callee signature at the call site.

use crate::ast::types::TableType;
use crate::runtime::value::Ref;
use crate::runtime::Trap;
use std::sync::RwLock;

/// A table instance: element type, limits, and the reference slots.
#[derive(Debug)]
pub struct TableInstance {
    ty: TableType,
    elems: RwLock<Vec<Ref>>,
    /// Configured hard cap, applied on top of the declared maximum
    size_cap: u32,
}

impl TableInstance {
    /// Create a table with every slot set to `init`.
    pub fn new(ty: TableType, init: Ref, size_cap: u32) -> Result<TableInstance, Trap> {
        if ty.limits.min > size_cap {
            return Err(Trap::TableOutOfMaxLimit);
        }
        if let Some(max) = ty.limits.max {
            if ty.limits.min > max {
                return Err(Trap::TableOutOfMaxLimit);
            }
        }
        let elems = vec![init; ty.limits.min as usize];
        Ok(TableInstance {
            ty,
            elems: RwLock::new(elems),
            size_cap,
        })
    }

    pub fn ty(&self) -> TableType {
        self.ty
    }

    /// Current size in slots.
    pub fn size(&self) -> u32 {
        self.elems.read().unwrap().len() as u32
    }

    /// Read the slot at `idx`.
    pub fn get(&self, idx: u32) -> Result<Ref, Trap> {
        self.elems
            .read()
            .unwrap()
            .get(idx as usize)
            .cloned()
            .ok_or(Trap::OutOfBoundsTableAccess)
    }

    /// Write the slot at `idx`.
    pub fn set(&self, idx: u32, value: Ref) -> Result<(), Trap> {
        let mut elems = self.elems.write().unwrap();
        let slot = elems.get_mut(idx as usize).ok_or(Trap::OutOfBoundsTableAccess)?;
        *slot = value;
        Ok(())
    }

    /// Grow by `delta` slots filled with `init`.
    ///
    /// Returns the previous size, or `None` when growth would exceed the
    /// declared maximum or the configured cap. On failure nothing changes.
    pub fn grow(&self, delta: u32, init: Ref) -> Option<u32> {
        let mut elems = self.elems.write().unwrap();
        let current = elems.len() as u32;
        let new_size = current.checked_add(delta)?;
        let effective_max = self.ty.limits.max.unwrap_or(u32::MAX).min(self.size_cap);
        if new_size > effective_max {
            return None;
        }
        elems.resize(new_size as usize, init);
        Some(current)
    }

    /// Fill `len` slots starting at `idx` with `value`, validating the
    /// whole range before any slot changes.
    pub fn fill(&self, idx: u32, value: Ref, len: u32) -> Result<(), Trap> {
        let mut elems = self.elems.write().unwrap();
        let end = idx.checked_add(len).ok_or(Trap::OutOfBoundsTableAccess)? as usize;
        if end > elems.len() {
            return Err(Trap::OutOfBoundsTableAccess);
        }
        elems[idx as usize..end].fill(value);
        Ok(())
    }

    /// Copy `len` slots from `src` (in `src_table`) to `dst` in this
    /// table. Ranges are validated before any slot moves.
    pub fn copy(&self, dst: u32, src_table: &TableInstance, src: u32, len: u32) -> Result<(), Trap> {
        let src_slice = {
            let src_elems = src_table.elems.read().unwrap();
            let end = src.checked_add(len).ok_or(Trap::OutOfBoundsTableAccess)? as usize;
            if end > src_elems.len() {
                return Err(Trap::OutOfBoundsTableAccess);
            }
            src_elems[src as usize..end].to_vec()
        };
        let mut elems = self.elems.write().unwrap();
        let end = dst.checked_add(len).ok_or(Trap::OutOfBoundsTableAccess)? as usize;
        if end > elems.len() {
            return Err(Trap::OutOfBoundsTableAccess);
        }
        elems[dst as usize..end].clone_from_slice(&src_slice);
        Ok(())
    }

    /// Write a run of references starting at `idx` (used by `table.init`
    /// and active element segments). The whole range is validated first.
    pub fn init(&self, idx: u32, refs: &[Ref]) -> Result<(), Trap> {
        let mut elems = self.elems.write().unwrap();
        let end = idx
            .checked_add(refs.len() as u32)
            .ok_or(Trap::OutOfBoundsTableAccess)? as usize;
        if end > elems.len() {
            return Err(Trap::OutOfBoundsTableAccess);
        }
        elems[idx as usize..end].clone_from_slice(refs);
        Ok(())
    }

    /// Snapshot of the slots, used as GC roots.
    pub fn snapshot(&self) -> Vec<Ref> {
        self.elems.read().unwrap().clone()
    }
}
