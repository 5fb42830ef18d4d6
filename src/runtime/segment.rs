//! Element and data segment instances
//!
//! Passive segments stay available to `table.init` / `memory.init` until
//! the corresponding `drop` opcode runs; dropping empties the backing
//! storage, after which any non-empty access traps through the ordinary
//! bounds checks.

use crate::ast::types::RefType;
use crate::runtime::value::Ref;
use crate::runtime::Trap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// An element segment instance.
#[derive(Debug)]
pub struct ElementInstance {
    elem_type: RefType,
    refs: RwLock<Vec<Ref>>,
    dropped: AtomicBool,
}

impl ElementInstance {
    pub fn new(elem_type: RefType, refs: Vec<Ref>) -> ElementInstance {
        ElementInstance {
            elem_type,
            refs: RwLock::new(refs),
            dropped: AtomicBool::new(false),
        }
    }

    pub fn elem_type(&self) -> RefType {
        self.elem_type
    }

    /// Remaining length (zero once dropped).
    pub fn len(&self) -> u32 {
        self.refs.read().unwrap().len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    /// Copy out `len` references starting at `src`, validating the range.
    pub fn slice(&self, src: u32, len: u32) -> Result<Vec<Ref>, Trap> {
        let refs = self.refs.read().unwrap();
        let end = src.checked_add(len).ok_or(Trap::OutOfBoundsTableAccess)? as usize;
        if end > refs.len() {
            return Err(Trap::OutOfBoundsTableAccess);
        }
        Ok(refs[src as usize..end].to_vec())
    }

    /// Release the backing vector (`elem.drop`). Idempotent.
    pub fn drop_elem(&self) {
        self.dropped.store(true, Ordering::Release);
        self.refs.write().unwrap().clear();
    }

    /// Snapshot of the references, used as GC roots.
    pub fn snapshot(&self) -> Vec<Ref> {
        self.refs.read().unwrap().clone()
    }
}

/// A data segment instance.
#[derive(Debug)]
pub struct DataInstance {
    bytes: RwLock<Vec<u8>>,
    dropped: AtomicBool,
}

impl DataInstance {
    pub fn new(bytes: Vec<u8>) -> DataInstance {
        DataInstance {
            bytes: RwLock::new(bytes),
            dropped: AtomicBool::new(false),
        }
    }

    /// Remaining length (zero once dropped).
    pub fn len(&self) -> u32 {
        self.bytes.read().unwrap().len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    /// Copy out `len` bytes starting at `src`, validating the range.
    pub fn slice(&self, src: u32, len: u32) -> Result<Vec<u8>, Trap> {
        let bytes = self.bytes.read().unwrap();
        let end = src.checked_add(len).ok_or(Trap::OutOfBoundsMemAccess)? as usize;
        if end > bytes.len() {
            return Err(Trap::OutOfBoundsMemAccess);
        }
        Ok(bytes[src as usize..end].to_vec())
    }

    /// Release the backing bytes (`data.drop`). Idempotent.
    pub fn drop_data(&self) {
        self.dropped.store(true, Ordering::Release);
        self.bytes.write().unwrap().clear();
    }
}
