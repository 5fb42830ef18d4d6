//! Validated Component Model abstract syntax
//!
//! A component aggregates core modules and wires them together through
//! core-instance expressions, aliases, and canonical-ABI adapters. Only
//! the sections the engine instantiates are represented; nested
//! components and the full interface-type grammar stay with the
//! decoder/validator.

use super::Module;

/// A validated component.
#[derive(Debug, Clone, Default)]
pub struct Component {
    /// Embedded core modules, indexed by core-instance expressions
    pub modules: Vec<Module>,
    /// Component function types referenced by `canon.lift`
    pub func_types: Vec<ComponentFuncType>,
    /// Sections in declaration order; index spaces grow as they execute
    pub sections: Vec<ComponentSection>,
}

/// The component sections the engine evaluates, in declaration order.
#[derive(Debug, Clone)]
pub enum ComponentSection {
    CoreInstance(CoreInstanceExpr),
    Alias(Alias),
    Canon(Canon),
    /// Invoke a component function at instantiation
    Start { func_idx: u32 },
    Import { name: String },
    Export(ComponentExport),
}

/// How a core instance enters the component's core-instance index space.
#[derive(Debug, Clone)]
pub enum CoreInstanceExpr {
    /// Instantiate an embedded module, satisfying its imports with
    /// previously created core instances by name.
    Instantiate {
        module_idx: u32,
        args: Vec<CoreInstantiateArg>,
    },
    /// Synthesize an instance from individual exports of prior instances.
    FromExports(Vec<CoreExportRef>),
}

/// One named argument of a core instantiation: the import module name is
/// satisfied by the exports of a prior core instance.
#[derive(Debug, Clone)]
pub struct CoreInstantiateArg {
    pub name: String,
    pub instance_idx: u32,
}

/// A reference to an export of a core instance.
#[derive(Debug, Clone)]
pub struct CoreExportRef {
    pub instance_idx: u32,
    pub name: String,
}

/// An alias projecting a core export into a component index space.
#[derive(Debug, Clone)]
pub struct Alias {
    pub target: AliasTarget,
}

/// The alias targets the engine resolves.
#[derive(Debug, Clone)]
pub enum AliasTarget {
    /// Project an export of a core instance (function, memory, ...)
    CoreExport { instance_idx: u32, name: String },
}

/// Canonical-ABI adapter declarations.
#[derive(Debug, Clone)]
pub enum Canon {
    /// Wrap a core function into a component function: interface-typed
    /// arguments are lowered into core values (through memory + realloc
    /// where needed), results lifted back.
    Lift {
        core_func_idx: u32,
        type_idx: u32,
        opts: CanonOpts,
    },
    /// Wrap a component function into a core function: core arguments are
    /// lifted to interface values, the component function invoked, and
    /// results lowered.
    Lower { func_idx: u32, opts: CanonOpts },
}

/// Options shared by `canon.lift` and `canon.lower`. Memory and realloc
/// are captured by reference; their owners must outlive the wrapper.
#[derive(Debug, Clone, Default)]
pub struct CanonOpts {
    /// Core memory index used for indirect values (strings)
    pub memory: Option<u32>,
    /// Core function index of the guest `realloc`
    pub realloc: Option<u32>,
}

/// An export of the component itself.
#[derive(Debug, Clone)]
pub struct ComponentExport {
    pub name: String,
    pub kind: ComponentExportKind,
    pub index: u32,
}

/// What a component export names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentExportKind {
    Func,
    CoreInstance,
}

/// A component-level function signature over interface types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentFuncType {
    pub params: Vec<(String, InterfaceType)>,
    pub results: Vec<InterfaceType>,
}

/// The interface-type subset the thin canonical-ABI adaptor handles.
/// Compound types beyond `string` are delegated to the full coercion
/// layer and are not represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    Bool,
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S64,
    U64,
    F32,
    F64,
    Char,
    String,
}
