//! Function instances
//!
//! A function instance is either a Wasm function (type, locals, bytecode,
//! a handle to its defining module, and an optional AOT entry symbol) or a
//! host function (signature plus a native callable). Wasm functions hold a
//! weak handle to their module: once the module is destroyed, calls
//! through surviving references fail instead of dangling.

use crate::ast::instruction::Instruction;
use crate::ast::types::{FunctionType, SubType, ValueType};
use crate::runtime::module::ModuleInstance;
use crate::runtime::value::{ValRaw, Value};
use crate::runtime::Trap;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Arc, Weak};

/// Host function implementations take the argument values and produce the
/// result values or a trap.
pub type HostFunc = Box<dyn Fn(Vec<Value>) -> Result<Vec<Value>, Trap> + Send + Sync>;

/// Entry signature of an ahead-of-time compiled function. The context
/// pointer is the thread-local execution context the intrinsics bridge
/// installs; a non-zero return reports a trap left in the bridge's error
/// slot.
pub type AotSymbol = unsafe extern "C" fn(*mut c_void, *const ValRaw, *mut ValRaw) -> i32;

/// Jump targets of one structured control construct, resolved when the
/// code body is created.
#[derive(Debug, Clone, Copy)]
pub struct BlockBounds {
    /// The `else` of an `if`, when present
    pub else_pc: Option<usize>,
    /// The matching `end`
    pub end_pc: usize,
}

/// A function body with its control-structure targets resolved.
#[derive(Debug)]
pub struct CodeBody {
    pub instrs: Vec<Instruction>,
    controls: HashMap<usize, BlockBounds>,
}

impl CodeBody {
    /// Resolve block/else/end pairing over a validated flat body.
    pub fn new(instrs: Vec<Instruction>) -> CodeBody {
        let mut controls = HashMap::new();
        let mut openers: Vec<usize> = Vec::new();
        for (pc, instr) in instrs.iter().enumerate() {
            match instr {
                i if i.opens_block() => openers.push(pc),
                Instruction::Else => {
                    if let Some(&opener) = openers.last() {
                        controls.insert(
                            opener,
                            BlockBounds {
                                else_pc: Some(pc),
                                end_pc: pc,
                            },
                        );
                    }
                }
                Instruction::End => {
                    if let Some(opener) = openers.pop() {
                        let else_pc = controls.get(&opener).and_then(|b| b.else_pc);
                        controls.insert(opener, BlockBounds { else_pc, end_pc: pc });
                    }
                }
                _ => {}
            }
        }
        CodeBody { instrs, controls }
    }

    /// Jump targets of the construct opened at `pc`.
    pub fn bounds(&self, pc: usize) -> Option<BlockBounds> {
        self.controls.get(&pc).copied()
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }
}

enum FuncKind {
    Wasm {
        module: Weak<ModuleInstance>,
        /// Declared locals, flattened (parameters excluded)
        locals: Vec<ValueType>,
        code: Arc<CodeBody>,
        /// Native entry attached by the AOT loader, if any
        aot: OnceCell<AotSymbol>,
    },
    Host {
        callable: HostFunc,
    },
}

/// A function instance.
pub struct FunctionInstance {
    ty: FunctionType,
    /// Index of the signature in the defining module's type table
    /// (0 for host functions, whose table is empty).
    type_idx: u32,
    /// Index in the defining module's function index space, recorded in
    /// stack traces (0 for host functions).
    func_idx: u32,
    types: Arc<Vec<SubType>>,
    kind: FuncKind,
}

impl FunctionInstance {
    /// Create a Wasm function instance. `locals` is the run-length local
    /// declaration from the code section.
    pub fn new_wasm(
        module: Weak<ModuleInstance>,
        types: Arc<Vec<SubType>>,
        type_idx: u32,
        func_idx: u32,
        ty: FunctionType,
        locals: &[(u32, ValueType)],
        body: Vec<Instruction>,
    ) -> FunctionInstance {
        let mut flat = Vec::new();
        for &(count, vt) in locals {
            flat.extend(std::iter::repeat(vt).take(count as usize));
        }
        FunctionInstance {
            ty,
            type_idx,
            func_idx,
            types,
            kind: FuncKind::Wasm {
                module,
                locals: flat,
                code: Arc::new(CodeBody::new(body)),
                aot: OnceCell::new(),
            },
        }
    }

    /// Create a host function instance.
    pub fn new_host(ty: FunctionType, callable: HostFunc) -> FunctionInstance {
        FunctionInstance {
            ty,
            type_idx: 0,
            func_idx: 0,
            types: Arc::new(Vec::new()),
            kind: FuncKind::Host { callable },
        }
    }

    /// Index in the defining module's function index space.
    pub fn func_idx(&self) -> u32 {
        self.func_idx
    }

    pub fn ty(&self) -> &FunctionType {
        &self.ty
    }

    pub fn type_idx(&self) -> u32 {
        self.type_idx
    }

    /// The defining module's type table (empty for host functions).
    pub fn types(&self) -> &Arc<Vec<SubType>> {
        &self.types
    }

    pub fn is_host(&self) -> bool {
        matches!(self.kind, FuncKind::Host { .. })
    }

    pub fn host_callable(&self) -> Option<&HostFunc> {
        match &self.kind {
            FuncKind::Host { callable } => Some(callable),
            FuncKind::Wasm { .. } => None,
        }
    }

    pub fn code(&self) -> Option<&Arc<CodeBody>> {
        match &self.kind {
            FuncKind::Wasm { code, .. } => Some(code),
            FuncKind::Host { .. } => None,
        }
    }

    /// Declared locals of a Wasm function (parameters excluded).
    pub fn locals(&self) -> &[ValueType] {
        match &self.kind {
            FuncKind::Wasm { locals, .. } => locals,
            FuncKind::Host { .. } => &[],
        }
    }

    /// Upgrade the defining-module handle. `None` once the module has
    /// been destroyed, or for host functions.
    pub fn defining_module(&self) -> Option<Arc<ModuleInstance>> {
        match &self.kind {
            FuncKind::Wasm { module, .. } => module.upgrade(),
            FuncKind::Host { .. } => None,
        }
    }

    /// The AOT entry symbol, if one was attached.
    pub fn aot_symbol(&self) -> Option<AotSymbol> {
        match &self.kind {
            FuncKind::Wasm { aot, .. } => aot.get().copied(),
            FuncKind::Host { .. } => None,
        }
    }

    /// Attach a compiled entry point. The first attachment wins; a
    /// repeated attachment for the same function is rejected.
    pub fn attach_aot_symbol(&self, symbol: AotSymbol) -> Result<(), ()> {
        match &self.kind {
            FuncKind::Wasm { aot, .. } => aot.set(symbol).map_err(|_| ()),
            FuncKind::Host { .. } => Err(()),
        }
    }
}

impl std::fmt::Debug for FunctionInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_host() { "host" } else { "wasm" };
        write!(f, "FunctionInstance({kind}, {})", self.ty)
    }
}
