//! WebAssembly type model
//!
//! Value types, reference types, and the defined (composite) types that a
//! validated module declares in its type section. These are the shapes the
//! decoder/validator hands to the engine; nothing here reads binary.

use std::fmt;

/// A WebAssembly value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
    /// 128-bit SIMD vector
    V128,
    /// Reference type with nullability and a heap type
    Ref(RefType),
}

impl ValueType {
    /// Byte width of the type's flat representation.
    pub fn byte_width(&self) -> u32 {
        match self {
            ValueType::I32 | ValueType::F32 => 4,
            ValueType::I64 | ValueType::F64 => 8,
            ValueType::V128 => 16,
            ValueType::Ref(_) => 8,
        }
    }

    /// Whether this is a numeric (non-vector, non-reference) type.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::I32 | ValueType::I64 | ValueType::F32 | ValueType::F64)
    }

    /// Whether this is a reference type.
    pub fn is_ref(&self) -> bool {
        matches!(self, ValueType::Ref(_))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::I32 => write!(f, "i32"),
            ValueType::I64 => write!(f, "i64"),
            ValueType::F32 => write!(f, "f32"),
            ValueType::F64 => write!(f, "f64"),
            ValueType::V128 => write!(f, "v128"),
            ValueType::Ref(r) => write!(f, "{r}"),
        }
    }
}

/// A reference type: nullability plus the referenced heap type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefType {
    pub nullable: bool,
    pub heap: HeapType,
}

impl RefType {
    pub const fn new(nullable: bool, heap: HeapType) -> Self {
        RefType { nullable, heap }
    }

    /// Shorthand for the classic `funcref` type.
    pub const fn funcref() -> Self {
        RefType::new(true, HeapType::Func)
    }

    /// Shorthand for the classic `externref` type.
    pub const fn externref() -> Self {
        RefType::new(true, HeapType::Extern)
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "(ref null {:?})", self.heap)
        } else {
            write!(f, "(ref {:?})", self.heap)
        }
    }
}

/// Abstract and concrete heap types.
///
/// `Type(i)` is a type-index reference into the defining module's type
/// table. Each abstract hierarchy has a bottom type; casts to a bottom
/// type only ever produce null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    Func,
    Extern,
    Any,
    Eq,
    I31,
    Struct,
    Array,
    Exn,
    /// Bottom of the `any` hierarchy
    None,
    /// Bottom of the `func` hierarchy
    NoFunc,
    /// Bottom of the `extern` hierarchy
    NoExtern,
    /// Concrete defined type at an index in the module's type table
    Type(u32),
}

impl HeapType {
    /// Map an abstract heap type to the bottom of its hierarchy.
    ///
    /// Concrete type indices map through their composite kind; the caller
    /// resolves those against the module's type table first.
    pub fn bottom(&self) -> HeapType {
        match self {
            HeapType::Func | HeapType::NoFunc => HeapType::NoFunc,
            HeapType::Extern | HeapType::NoExtern => HeapType::NoExtern,
            HeapType::Exn => HeapType::Exn,
            HeapType::Any
            | HeapType::Eq
            | HeapType::I31
            | HeapType::Struct
            | HeapType::Array
            | HeapType::None => HeapType::None,
            // Resolved by the caller against the type table.
            HeapType::Type(i) => HeapType::Type(*i),
        }
    }

    /// Whether this heap type is one of the three bottoms.
    pub fn is_bottom(&self) -> bool {
        matches!(self, HeapType::None | HeapType::NoFunc | HeapType::NoExtern)
    }
}

/// Storage type of a struct field or array element.
///
/// Packed i8/i16 occupy their natural width in the object and are
/// sign- or zero-extended to i32 on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Val(ValueType),
    I8,
    I16,
}

impl StorageType {
    /// The value type this storage unpacks to on the stack.
    pub fn unpacked(&self) -> ValueType {
        match self {
            StorageType::Val(t) => *t,
            StorageType::I8 | StorageType::I16 => ValueType::I32,
        }
    }

    /// Whether the storage is a packed (sub-i32) integer.
    pub fn is_packed(&self) -> bool {
        matches!(self, StorageType::I8 | StorageType::I16)
    }
}

/// A struct field or array element type: storage plus mutability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldType {
    pub storage: StorageType,
    pub mutable: bool,
}

impl FieldType {
    pub const fn new(storage: StorageType, mutable: bool) -> Self {
        FieldType { storage, mutable }
    }
}

/// A function signature.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionType {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl FunctionType {
    pub fn new(params: Vec<ValueType>, results: Vec<ValueType>) -> Self {
        FunctionType { params, results }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> (")?;
        for (i, r) in self.results.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{r}")?;
        }
        write!(f, ")")
    }
}

/// The composite shape of a defined type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositeType {
    Func(FunctionType),
    Struct(Vec<FieldType>),
    Array(FieldType),
}

impl CompositeType {
    /// The function signature, if this is a function type.
    pub fn as_func(&self) -> Option<&FunctionType> {
        match self {
            CompositeType::Func(ft) => Some(ft),
            _ => None,
        }
    }
}

/// A defined type at some index in a module's type table: the composite
/// shape plus its declared supertypes within the recursion group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubType {
    pub is_final: bool,
    /// Type-table indices of declared supertypes (at most one in practice).
    pub supertypes: Vec<u32>,
    pub composite: CompositeType,
}

impl SubType {
    /// A final subtype with no declared supertypes.
    pub fn from_composite(composite: CompositeType) -> Self {
        SubType {
            is_final: true,
            supertypes: Vec::new(),
            composite,
        }
    }

    /// Convenience constructor for a plain function type entry.
    pub fn func(params: Vec<ValueType>, results: Vec<ValueType>) -> Self {
        SubType::from_composite(CompositeType::Func(FunctionType::new(params, results)))
    }
}

/// Size limits for tables and memories, in slots or pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
    /// Shared (multithreaded) memory. Always false for tables.
    pub shared: bool,
}

impl Limits {
    pub const fn new(min: u32, max: Option<u32>) -> Self {
        Limits { min, max, shared: false }
    }

    pub const fn shared(min: u32, max: u32) -> Self {
        Limits {
            min,
            max: Some(max),
            shared: true,
        }
    }

    /// Whether `other` satisfies these limits when imported (import
    /// matching: min at least ours, max no looser than ours).
    pub fn is_satisfied_by(&self, other: &Limits) -> bool {
        if other.shared != self.shared || other.min < self.min {
            return false;
        }
        match (self.max, other.max) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(want), Some(have)) => have <= want,
        }
    }
}

/// Type of a table: element reference type plus limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub elem: RefType,
    pub limits: Limits,
}

/// Type of a linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
}

/// Type of a global: value type plus mutability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub value: ValueType,
    pub mutable: bool,
}

/// Type of an exception tag: index of a function type in the type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagType {
    pub type_idx: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bottom_types() {
        assert_eq!(HeapType::Func.bottom(), HeapType::NoFunc);
        assert_eq!(HeapType::Extern.bottom(), HeapType::NoExtern);
        assert_eq!(HeapType::Any.bottom(), HeapType::None);
        assert_eq!(HeapType::Eq.bottom(), HeapType::None);
        assert_eq!(HeapType::I31.bottom(), HeapType::None);
        assert_eq!(HeapType::Struct.bottom(), HeapType::None);
        assert_eq!(HeapType::Array.bottom(), HeapType::None);
        assert_eq!(HeapType::NoFunc.bottom(), HeapType::NoFunc);
    }

    #[test]
    fn test_storage_unpacked() {
        assert_eq!(StorageType::I8.unpacked(), ValueType::I32);
        assert_eq!(StorageType::I16.unpacked(), ValueType::I32);
        assert_eq!(StorageType::Val(ValueType::I64).unpacked(), ValueType::I64);
        assert!(StorageType::I8.is_packed());
        assert!(!StorageType::Val(ValueType::I32).is_packed());
    }

    #[test]
    fn test_limits_import_matching() {
        let want = Limits::new(1, Some(4));
        assert!(want.is_satisfied_by(&Limits::new(2, Some(3))));
        assert!(want.is_satisfied_by(&Limits::new(1, Some(4))));
        // Lower minimum than required
        assert!(!want.is_satisfied_by(&Limits::new(0, Some(4))));
        // Looser maximum than allowed
        assert!(!want.is_satisfied_by(&Limits::new(1, None)));
        // Unbounded requirement accepts anything at least min
        assert!(Limits::new(1, None).is_satisfied_by(&Limits::new(5, None)));
        // Sharedness must agree
        assert!(!want.is_satisfied_by(&Limits::shared(1, 4)));
    }
}
