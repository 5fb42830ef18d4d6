//! Validated WebAssembly abstract syntax
//!
//! The structures an external decoder/validator produces and the engine
//! consumes. A [`Module`] here is assumed validated: the engine relies on
//! the static type discipline (operand stacks match opcode signatures,
//! indices are in range for static contexts) and only performs the dynamic
//! checks the execution semantics require.

pub mod component;
pub mod instruction;
pub mod types;

pub use instruction::{BlockType, Catch, CatchKind, Instruction, MemArg};
pub use types::{
    CompositeType, FieldType, FunctionType, GlobalType, HeapType, Limits, MemoryType, RefType,
    StorageType, SubType, TableType, TagType, ValueType,
};

/// A validated core module.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Defined types (recursion groups flattened in declaration order)
    pub types: Vec<SubType>,
    pub imports: Vec<Import>,
    /// Function section: type index per defined function
    pub funcs: Vec<u32>,
    /// Code section, parallel to `funcs`
    pub code: Vec<FuncBody>,
    pub tables: Vec<TableDecl>,
    pub memories: Vec<MemoryType>,
    pub tags: Vec<TagType>,
    pub globals: Vec<GlobalDecl>,
    pub elements: Vec<ElementSegment>,
    pub datas: Vec<DataSegment>,
    pub exports: Vec<Export>,
    /// Start function index, if declared
    pub start: Option<u32>,
}

impl Module {
    pub fn new() -> Self {
        Module::default()
    }

    /// Number of imports of the given external kind, used to split the
    /// shared index space between imported and defined entities.
    pub fn import_count(&self, kind: ExternalKind) -> usize {
        self.imports.iter().filter(|i| i.desc.kind() == kind).count()
    }
}

/// A single import: `(module, name)` resolved against the store.
#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub desc: ImportDesc,
}

/// What an import binds.
#[derive(Debug, Clone)]
pub enum ImportDesc {
    Func { type_idx: u32 },
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
    Tag(TagType),
}

impl ImportDesc {
    pub fn kind(&self) -> ExternalKind {
        match self {
            ImportDesc::Func { .. } => ExternalKind::Func,
            ImportDesc::Table(_) => ExternalKind::Table,
            ImportDesc::Memory(_) => ExternalKind::Memory,
            ImportDesc::Global(_) => ExternalKind::Global,
            ImportDesc::Tag(_) => ExternalKind::Tag,
        }
    }
}

/// The five external kinds shared by imports and exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Func,
    Table,
    Memory,
    Global,
    Tag,
}

/// One entry of the code section.
#[derive(Debug, Clone, Default)]
pub struct FuncBody {
    /// Local declarations, run-length encoded as (count, type)
    pub locals: Vec<(u32, ValueType)>,
    /// Flat instruction sequence, terminated by `End`
    pub body: Vec<Instruction>,
}

impl FuncBody {
    pub fn new(locals: Vec<(u32, ValueType)>, body: Vec<Instruction>) -> Self {
        FuncBody { locals, body }
    }
}

/// A table declaration, optionally with an initializer expression for its
/// slots (absent means filled with null).
#[derive(Debug, Clone)]
pub struct TableDecl {
    pub ty: TableType,
    pub init: Option<Vec<Instruction>>,
}

impl TableDecl {
    pub fn new(ty: TableType) -> Self {
        TableDecl { ty, init: None }
    }
}

/// A global declaration with its constant initializer expression.
#[derive(Debug, Clone)]
pub struct GlobalDecl {
    pub ty: GlobalType,
    pub init: Vec<Instruction>,
}

/// An element segment.
#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub mode: ElementMode,
    pub elem_type: RefType,
    /// One constant expression per element
    pub items: Vec<Vec<Instruction>>,
}

/// Element segment mode.
#[derive(Debug, Clone)]
pub enum ElementMode {
    /// Available to `table.init` until dropped
    Passive,
    /// Copied into a table at instantiation, then treated as dropped
    Active { table_idx: u32, offset: Vec<Instruction> },
    /// Only makes its functions referenceable; dropped at instantiation
    Declarative,
}

/// A data segment.
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub mode: DataMode,
    pub bytes: Vec<u8>,
}

/// Data segment mode.
#[derive(Debug, Clone)]
pub enum DataMode {
    /// Available to `memory.init` until dropped
    Passive,
    /// Copied into a memory at instantiation, then treated as dropped
    Active { memory_idx: u32, offset: Vec<Instruction> },
}

/// A single export.
#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub kind: ExternalKind,
    pub index: u32,
}

impl Export {
    pub fn new(name: impl Into<String>, kind: ExternalKind, index: u32) -> Self {
        Export {
            name: name.into(),
            kind,
            index,
        }
    }
}
