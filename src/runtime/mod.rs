//! Runtime representation
//!
//! Values, references, the garbage-collected heap, the stack manager, and
//! the instance zoo (function, table, memory, global, tag, element, data,
//! module, component) plus the store that registers named instances.

pub mod component;
pub mod func;
pub mod gc;
pub mod global;
pub mod memory;
pub mod module;
pub mod segment;
pub mod stack;
pub mod store;
pub mod table;
pub mod tag;
pub mod typing;
pub mod value;

pub use component::{ComponentFunction, ComponentInstance};
pub use func::{AotSymbol, CodeBody, FunctionInstance, HostFunc};
pub use gc::{GcHeap, GcRef};
pub use global::GlobalInstance;
pub use memory::{MemoryInstance, PAGE_SIZE};
pub use module::{ExternVal, ModuleInstance};
pub use segment::{DataInstance, ElementInstance};
pub use stack::{Frame, Label, LabelKind, StackManager};
pub use store::Store;
pub use table::TableInstance;
pub use tag::{ExceptionInstance, TagInstance};
pub use value::{Ref, Value};

/// Abrupt termination of an invocation.
///
/// Traps propagate out of the interpreter loop to the caller of the
/// outermost frame; they are never catchable by `try_table`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Trap {
    #[error("unreachable")]
    Unreachable,
    #[error("integer divide by zero")]
    IntegerDivByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConvToInt,
    #[error("out of bounds memory access")]
    OutOfBoundsMemAccess,
    #[error("out of bounds table access")]
    OutOfBoundsTableAccess,
    #[error("out of bounds array access")]
    OutOfBoundsArrayAccess,
    #[error("undefined element")]
    UndefinedElement,
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("memory grown beyond maximum limit")]
    MemOutOfMaxLimit,
    #[error("table grown beyond maximum limit")]
    TableOutOfMaxLimit,
    #[error("uninitialized element")]
    UninitializedElement,
    #[error("unaligned atomic access")]
    Unaligned,
    #[error("expected shared memory")]
    ExpectSharedMemory,
    #[error("cast failed")]
    CastFailed,
    #[error("null reference access")]
    AccessNullRef,
    #[error("cost limit exceeded")]
    CostLimitExceeded,
    #[error("execution interrupted")]
    Interrupted,
    #[error("uncaught exception")]
    UncaughtException,
}

/// Errors produced by instantiation and registration. These never surface
/// as traps; the public entry points return them directly.
#[derive(Debug, thiserror::Error)]
pub enum InstantiateError {
    #[error("module name conflict: {0}")]
    ModuleNameConflict(String),
    #[error("incompatible import type for {module}.{name}: expected {expected}, got {actual}")]
    IncompatibleImportType {
        module: String,
        name: String,
        expected: String,
        actual: String,
    },
    #[error("undefined import: {module}.{name}")]
    UndefinedImport { module: String, name: String },
    #[error("start function failed: {0}")]
    StartFunctionFailed(Trap),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("data segment does not fit in memory")]
    DataSegmentOutOfRange,
    #[error("element segment does not fit in table")]
    ElementSegmentOutOfRange,
    #[error("initializer expression trapped: {0}")]
    Init(Trap),
}
