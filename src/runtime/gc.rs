//! Garbage-collected heap for struct and array objects
//!
//! A process-wide slab keeps every GC object behind a stable
//! `(index, generation)` handle, so references never dangle: a handle to a
//! reclaimed slot fails its generation check instead of reading stale
//! data. Collection is tracing mark-sweep from explicitly supplied roots,
//! which reclaims cycles that pure reference counting could not.
//!
//! The heap is only swept from [`GcHeap::collect`], which the executor
//! invokes between invocations; no sweep happens while a stack is live.

use crate::ast::types::SubType;
use crate::runtime::module::ModuleInstance;
use crate::runtime::value::{Ref, Value};
use crate::runtime::Trap;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Handle to a heap object. Stale handles (outliving a collection that
/// reclaimed their slot) are detected by the generation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef {
    index: u32,
    gen: u32,
}

/// A struct or array object.
#[derive(Debug)]
pub enum GcObject {
    Struct {
        /// Index of the defining type in `types`
        type_idx: u32,
        /// The defining module's type table
        types: Arc<Vec<SubType>>,
        /// Field values, packed storage already masked
        fields: Vec<Value>,
    },
    Array {
        type_idx: u32,
        types: Arc<Vec<SubType>>,
        elems: Vec<Value>,
    },
}

impl GcObject {
    pub fn type_idx(&self) -> u32 {
        match self {
            GcObject::Struct { type_idx, .. } | GcObject::Array { type_idx, .. } => *type_idx,
        }
    }

    pub fn types(&self) -> &Arc<Vec<SubType>> {
        match self {
            GcObject::Struct { types, .. } | GcObject::Array { types, .. } => types,
        }
    }
}

struct Slot {
    gen: u32,
    marked: bool,
    object: Option<GcObject>,
}

struct HeapInner {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

/// The process-wide GC heap.
pub struct GcHeap {
    inner: Mutex<HeapInner>,
}

static HEAP: Lazy<GcHeap> = Lazy::new(|| GcHeap {
    inner: Mutex::new(HeapInner {
        slots: Vec::new(),
        free: Vec::new(),
    }),
});

/// Access the process-wide heap.
pub fn heap() -> &'static GcHeap {
    &HEAP
}

impl GcHeap {
    /// A fresh, empty heap. Engine allocation goes through the
    /// process-wide [`heap`]; isolated heaps exist for tests.
    pub fn new() -> GcHeap {
        GcHeap {
            inner: Mutex::new(HeapInner {
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    fn alloc(&self, object: GcObject) -> GcRef {
        let mut inner = self.inner.lock().unwrap();
        if let Some(index) = inner.free.pop() {
            let slot = &mut inner.slots[index];
            slot.object = Some(object);
            slot.marked = false;
            GcRef {
                index: index as u32,
                gen: slot.gen,
            }
        } else {
            let index = inner.slots.len();
            inner.slots.push(Slot {
                gen: 0,
                marked: false,
                object: Some(object),
            });
            GcRef {
                index: index as u32,
                gen: 0,
            }
        }
    }

    /// Allocate a struct object.
    pub fn alloc_struct(&self, type_idx: u32, types: Arc<Vec<SubType>>, fields: Vec<Value>) -> GcRef {
        self.alloc(GcObject::Struct {
            type_idx,
            types,
            fields,
        })
    }

    /// Allocate an array object.
    pub fn alloc_array(&self, type_idx: u32, types: Arc<Vec<SubType>>, elems: Vec<Value>) -> GcRef {
        self.alloc(GcObject::Array {
            type_idx,
            types,
            elems,
        })
    }

    /// Run `f` against the object behind `r`. Stale or reclaimed handles
    /// report a null-reference access.
    ///
    /// `f` must not re-enter the heap.
    pub fn with<R>(&self, r: GcRef, f: impl FnOnce(&GcObject) -> Result<R, Trap>) -> Result<R, Trap> {
        let inner = self.inner.lock().unwrap();
        let slot = inner.slots.get(r.index as usize).ok_or(Trap::AccessNullRef)?;
        if slot.gen != r.gen {
            return Err(Trap::AccessNullRef);
        }
        let object = slot.object.as_ref().ok_or(Trap::AccessNullRef)?;
        f(object)
    }

    /// Mutable variant of [`GcHeap::with`].
    pub fn with_mut<R>(&self, r: GcRef, f: impl FnOnce(&mut GcObject) -> Result<R, Trap>) -> Result<R, Trap> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.slots.get_mut(r.index as usize).ok_or(Trap::AccessNullRef)?;
        if slot.gen != r.gen {
            return Err(Trap::AccessNullRef);
        }
        let object = slot.object.as_mut().ok_or(Trap::AccessNullRef)?;
        f(object)
    }

    /// Array length, trapping on stale handles or struct objects.
    pub fn array_len(&self, r: GcRef) -> Result<u32, Trap> {
        self.with(r, |obj| match obj {
            GcObject::Array { elems, .. } => Ok(elems.len() as u32),
            GcObject::Struct { .. } => Err(Trap::AccessNullRef),
        })
    }

    /// Copy `cnt` elements between two arrays, handling overlap when the
    /// source and destination are the same object. Bounds are validated
    /// before any element moves.
    pub fn array_copy(
        &self,
        dst: GcRef,
        dst_idx: u32,
        src: GcRef,
        src_idx: u32,
        cnt: u32,
    ) -> Result<(), Trap> {
        let mut inner = self.inner.lock().unwrap();

        let src_elems = {
            let slot = inner.slots.get(src.index as usize).ok_or(Trap::AccessNullRef)?;
            if slot.gen != src.gen {
                return Err(Trap::AccessNullRef);
            }
            match slot.object.as_ref().ok_or(Trap::AccessNullRef)? {
                GcObject::Array { elems, .. } => elems.clone(),
                GcObject::Struct { .. } => return Err(Trap::AccessNullRef),
            }
        };
        let src_end = src_idx
            .checked_add(cnt)
            .ok_or(Trap::OutOfBoundsArrayAccess)? as usize;
        if src_end > src_elems.len() {
            return Err(Trap::OutOfBoundsArrayAccess);
        }

        let slot = inner.slots.get_mut(dst.index as usize).ok_or(Trap::AccessNullRef)?;
        if slot.gen != dst.gen {
            return Err(Trap::AccessNullRef);
        }
        let dst_elems = match slot.object.as_mut().ok_or(Trap::AccessNullRef)? {
            GcObject::Array { elems, .. } => elems,
            GcObject::Struct { .. } => return Err(Trap::AccessNullRef),
        };
        let dst_end = dst_idx
            .checked_add(cnt)
            .ok_or(Trap::OutOfBoundsArrayAccess)? as usize;
        if dst_end > dst_elems.len() {
            return Err(Trap::OutOfBoundsArrayAccess);
        }

        dst_elems[dst_idx as usize..dst_end].clone_from_slice(&src_elems[src_idx as usize..src_end]);
        Ok(())
    }

    /// Mark from `roots` and sweep everything unreachable. Reachability
    /// follows struct fields, array elements, exception payloads, and --
    /// through function references -- the globals, tables, and element
    /// segments of the referenced functions' defining modules.
    pub fn collect(&self, roots: impl IntoIterator<Item = Value>) {
        let mut inner = self.inner.lock().unwrap();
        for slot in inner.slots.iter_mut() {
            slot.marked = false;
        }

        let mut worklist: Vec<Value> = roots.into_iter().collect();
        let mut seen_modules: HashSet<*const ModuleInstance> = HashSet::new();

        while let Some(value) = worklist.pop() {
            let r = match value {
                Value::Ref(r) => r,
                _ => continue,
            };
            match r {
                Ref::Struct(g) | Ref::Array(g) => {
                    let slot = match inner.slots.get_mut(g.index as usize) {
                        Some(s) if s.gen == g.gen && s.object.is_some() => s,
                        _ => continue,
                    };
                    if slot.marked {
                        continue;
                    }
                    slot.marked = true;
                    match slot.object.as_ref().unwrap() {
                        GcObject::Struct { fields, .. } => worklist.extend(fields.iter().cloned()),
                        GcObject::Array { elems, .. } => worklist.extend(elems.iter().cloned()),
                    }
                }
                Ref::Func(func) => {
                    if let Some(module) = func.defining_module() {
                        if seen_modules.insert(Arc::as_ptr(&module)) {
                            module.gc_roots(&mut worklist);
                        }
                    }
                }
                Ref::Exn(exn) => worklist.extend(exn.values.iter().cloned()),
                Ref::Null(_) | Ref::Extern(_) | Ref::I31(_) => {}
            }
        }

        let mut reclaimed = Vec::new();
        for (index, slot) in inner.slots.iter_mut().enumerate() {
            if slot.object.is_some() && !slot.marked {
                slot.object = None;
                slot.gen = slot.gen.wrapping_add(1);
                reclaimed.push(index);
            }
        }
        inner.free.extend(reclaimed);
    }

    /// Number of live objects, for tests and statistics.
    pub fn live_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.slots.iter().filter(|s| s.object.is_some()).count()
    }
}

impl Default for GcHeap {
    fn default() -> Self {
        GcHeap::new()
    }
}
