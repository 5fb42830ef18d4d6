//! A WebAssembly execution engine written in Rust.
//!
//! kiln evaluates validated WebAssembly modules and components: it
//! instantiates them against a store of host-provided and previously
//! instantiated entities, interprets their bytecode, and exposes a stable
//! intrinsics bridge through which ahead-of-time compiled code re-enters
//! the runtime. Decoding and validation are external: the engine consumes
//! the [`ast`] structures a decoder/validator produces.
//!
//! # Modules
//!
//! - [`ast`] -- Validated module/component structures and the instruction ADT.
//! - [`runtime`] -- Values, references, the GC heap, the stack manager, and
//!   the instance zoo plus the named-instance store.
//! - [`executor`] -- Instantiation, the interpreter, the atomic wait/notify
//!   rendezvous, the canonical-ABI adaptor, and the AOT intrinsics bridge.
//!
//! # Example
//!
//! Build a module in memory, instantiate it, and call an exported function:
//!
//! ```
//! use kiln::ast::{self, Instruction, Module};
//! use kiln::ast::types::{SubType, ValueType};
//! use kiln::executor::Executor;
//! use kiln::runtime::{Store, Value};
//!
//! let mut module = Module::new();
//! module.types.push(SubType::func(
//!     vec![ValueType::I32, ValueType::I32],
//!     vec![ValueType::I32],
//! ));
//! module.funcs.push(0);
//! module.code.push(ast::FuncBody::new(
//!     vec![],
//!     vec![
//!         Instruction::LocalGet { idx: 0 },
//!         Instruction::LocalGet { idx: 1 },
//!         Instruction::I32Add,
//!         Instruction::End,
//!     ],
//! ));
//! module.exports.push(ast::Export::new("add", ast::ExternalKind::Func, 0));
//!
//! let executor = Executor::default();
//! let mut store = Store::new();
//! let instance = executor.instantiate_module(&mut store, &module).unwrap();
//! let add = instance.exported_func("add").unwrap();
//! let results = executor
//!     .invoke(&add, &[Value::I32(2), Value::I32(3)], &[ValueType::I32, ValueType::I32])
//!     .unwrap();
//! assert_eq!(results[0].0, Value::I32(5));
//! ```

pub mod ast;
pub mod executor;
pub mod runtime;

pub use executor::{Config, Executor};
pub use runtime::{InstantiateError, Store, Trap, Value};
