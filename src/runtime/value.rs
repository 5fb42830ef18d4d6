//! WebAssembly value and reference representation
//!
//! Numeric values carry exactly the bit pattern of their declared type;
//! the tagged representation makes the "no stale high bits" invariant hold
//! by construction. References discriminate null, function, extern, GC
//! object, i31, and exception variants; nullability lives in the static
//! type, the dynamic tag only discriminates.

use crate::ast::types::{HeapType, RefType, StorageType, ValueType};
use crate::runtime::func::FunctionInstance;
use crate::runtime::gc::GcRef;
use crate::runtime::tag::ExceptionInstance;
use fhex::ToHex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An opaque host-provided object carried by an extern reference.
pub type ExternObj = Arc<dyn Any + Send + Sync>;

/// Runtime representation of WebAssembly values.
#[derive(Debug, Clone)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    V128([u8; 16]),
    Ref(Ref),
}

/// Runtime representation of a reference.
#[derive(Clone)]
pub enum Ref {
    /// Null reference of some heap hierarchy
    Null(HeapType),
    /// Function reference
    Func(Arc<FunctionInstance>),
    /// Opaque extern/host reference
    Extern(ExternObj),
    /// GC struct object
    Struct(GcRef),
    /// GC array object
    Array(GcRef),
    /// Unboxed 31-bit integer (stored zero-extended)
    I31(u32),
    /// Captured exception reference
    Exn(Arc<ExceptionInstance>),
}

impl Ref {
    /// Null funcref shorthand.
    pub fn null_func() -> Ref {
        Ref::Null(HeapType::NoFunc)
    }

    /// Null externref shorthand.
    pub fn null_extern() -> Ref {
        Ref::Null(HeapType::NoExtern)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Ref::Null(_))
    }

    /// The dynamic heap kind of this reference, used for display and for
    /// abstract-hierarchy tests.
    pub fn heap_kind(&self) -> HeapType {
        match self {
            Ref::Null(h) => *h,
            Ref::Func(_) => HeapType::Func,
            Ref::Extern(_) => HeapType::Extern,
            Ref::Struct(_) => HeapType::Struct,
            Ref::Array(_) => HeapType::Array,
            Ref::I31(_) => HeapType::I31,
            Ref::Exn(_) => HeapType::Exn,
        }
    }

    /// Reference identity, as observed by `ref.eq`. Null references are
    /// equal regardless of their hierarchy.
    pub fn identity_eq(a: &Ref, b: &Ref) -> bool {
        match (a, b) {
            (Ref::Null(_), Ref::Null(_)) => true,
            (Ref::Func(x), Ref::Func(y)) => Arc::ptr_eq(x, y),
            (Ref::Extern(x), Ref::Extern(y)) => Arc::ptr_eq(x, y),
            (Ref::Struct(x), Ref::Struct(y)) => x == y,
            (Ref::Array(x), Ref::Array(y)) => x == y,
            (Ref::I31(x), Ref::I31(y)) => x == y,
            (Ref::Exn(x), Ref::Exn(y)) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        Ref::identity_eq(self, other)
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ref::Null(h) => write!(f, "null:{h:?}"),
            Ref::Func(func) => write!(f, "funcref:{:p}", Arc::as_ptr(func)),
            Ref::Extern(obj) => write!(f, "externref:{:p}", Arc::as_ptr(obj)),
            Ref::Struct(r) => write!(f, "structref:{r:?}"),
            Ref::Array(r) => write!(f, "arrayref:{r:?}"),
            Ref::I31(v) => write!(f, "i31:{v}"),
            Ref::Exn(e) => write!(f, "exnref:{:p}", Arc::as_ptr(e)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            // Bit comparison so NaN payloads and signed zeros compare
            // the way test expectations need them to.
            (Value::F32(a), Value::F32(b)) => a.to_bits() == b.to_bits(),
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::V128(a), Value::V128(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Get the WebAssembly type of this value. References report their
    /// dynamic heap kind with the nullability of the tag.
    pub fn typ(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
            Value::V128(_) => ValueType::V128,
            Value::Ref(r) => ValueType::Ref(RefType::new(r.is_null(), r.heap_kind())),
        }
    }

    /// The zero/null value of a type, used for locals and default-initialized
    /// fields and elements.
    pub fn default_for(ty: ValueType) -> Value {
        match ty {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
            ValueType::V128 => Value::V128([0; 16]),
            ValueType::Ref(rt) => Value::Ref(Ref::Null(rt.heap.bottom())),
        }
    }

    /// Whether this value is admissible for the given declared type. Used
    /// when checking invocation parameters; reference checks are by
    /// hierarchy only, full subtype tests happen in the cast ops.
    pub fn matches_type(&self, ty: &ValueType) -> bool {
        match (self, ty) {
            (Value::I32(_), ValueType::I32)
            | (Value::I64(_), ValueType::I64)
            | (Value::F32(_), ValueType::F32)
            | (Value::F64(_), ValueType::F64)
            | (Value::V128(_), ValueType::V128) => true,
            (Value::Ref(r), ValueType::Ref(rt)) => {
                if r.is_null() {
                    rt.nullable
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    /// Convert to i32, returning None if wrong type
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to i64, returning None if wrong type
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to f32, returning None if wrong type
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to f64, returning None if wrong type
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to a v128 bit pattern, returning None if wrong type
    pub fn as_v128(&self) -> Option<[u8; 16]> {
        match self {
            Value::V128(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow the reference, returning None if wrong type
    pub fn as_ref_value(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }
}

/// Truncate a value to fit a packed storage type by low-order mask.
/// Non-packed storage passes through unchanged.
pub fn pack(storage: StorageType, value: Value) -> Value {
    match (storage, &value) {
        (StorageType::I8, Value::I32(v)) => Value::I32(v & 0xFF),
        (StorageType::I16, Value::I32(v)) => Value::I32(v & 0xFFFF),
        _ => value,
    }
}

/// Sign- or zero-extend a packed storage value to i32. Non-packed storage
/// passes through unchanged.
pub fn unpack(storage: StorageType, value: Value, signed: bool) -> Value {
    match (storage, &value) {
        (StorageType::I8, Value::I32(v)) => {
            if signed {
                Value::I32(*v as u8 as i8 as i32)
            } else {
                Value::I32(*v & 0xFF)
            }
        }
        (StorageType::I16, Value::I32(v)) => {
            if signed {
                Value::I32(*v as u16 as i16 as i32)
            } else {
                Value::I32(*v & 0xFFFF)
            }
        }
        _ => value,
    }
}

/// Raw 128-bit value slot of the compiled-code ABI. Numeric values occupy
/// the low bytes little-endian; v128 fills the slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ValRaw {
    bytes: [u8; 16],
}

impl ValRaw {
    pub fn zero() -> ValRaw {
        ValRaw::default()
    }

    pub fn from_value(value: &Value) -> Option<ValRaw> {
        let mut bytes = [0u8; 16];
        match value {
            Value::I32(v) => bytes[..4].copy_from_slice(&v.to_le_bytes()),
            Value::I64(v) => bytes[..8].copy_from_slice(&v.to_le_bytes()),
            Value::F32(v) => bytes[..4].copy_from_slice(&v.to_bits().to_le_bytes()),
            Value::F64(v) => bytes[..8].copy_from_slice(&v.to_bits().to_le_bytes()),
            Value::V128(v) => bytes.copy_from_slice(v),
            // References do not cross the raw ABI directly; compiled code
            // manipulates them through the intrinsic proxies.
            Value::Ref(_) => return None,
        }
        Some(ValRaw { bytes })
    }

    pub fn to_value(self, ty: ValueType) -> Option<Value> {
        let b = self.bytes;
        match ty {
            ValueType::I32 => Some(Value::I32(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
            ValueType::I64 => Some(Value::I64(i64::from_le_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ]))),
            ValueType::F32 => Some(Value::F32(f32::from_bits(u32::from_le_bytes([
                b[0], b[1], b[2], b[3],
            ])))),
            ValueType::F64 => Some(Value::F64(f64::from_bits(u64::from_le_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ])))),
            ValueType::V128 => Some(Value::V128(b)),
            ValueType::Ref(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "i32:{v}"),
            Value::I64(v) => write!(f, "i64:{v}"),
            Value::F32(v) => write!(f, "f32:{}", v.to_hex()),
            Value::F64(v) => write!(f, "f64:{}", v.to_hex()),
            Value::V128(v) => {
                write!(f, "v128:0x")?;
                for byte in v.iter().rev() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Ref(r) => write!(f, "{r:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type() {
        assert_eq!(Value::I32(42).typ(), ValueType::I32);
        assert_eq!(Value::I64(42).typ(), ValueType::I64);
        assert_eq!(Value::F32(42.0).typ(), ValueType::F32);
        assert_eq!(Value::F64(42.0).typ(), ValueType::F64);
        assert_eq!(Value::V128([0; 16]).typ(), ValueType::V128);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::I32(42).as_i32(), Some(42));
        assert_eq!(Value::I32(42).as_i64(), None);
        assert_eq!(Value::I64(42).as_i64(), Some(42));
        assert_eq!(Value::F32(42.0).as_f32(), Some(42.0));
        assert_eq!(Value::F64(42.0).as_f64(), Some(42.0));
    }

    #[test]
    fn test_null_refs_equal() {
        let a = Ref::Null(HeapType::NoFunc);
        let b = Ref::Null(HeapType::None);
        assert!(Ref::identity_eq(&a, &b));
        assert!(!Ref::identity_eq(&a, &Ref::I31(0)));
        assert!(Ref::identity_eq(&Ref::I31(7), &Ref::I31(7)));
        assert!(!Ref::identity_eq(&Ref::I31(7), &Ref::I31(8)));
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        // Identity within the packed range, matching signedness
        for v in [0i32, 1, 127, 255] {
            let packed = pack(StorageType::I8, Value::I32(v));
            assert_eq!(unpack(StorageType::I8, packed, false), Value::I32(v));
        }
        for v in [-128i32, -1, 0, 127] {
            let packed = pack(StorageType::I8, Value::I32(v));
            assert_eq!(unpack(StorageType::I8, packed, true), Value::I32(v));
        }
        for v in [-32768i32, -1, 0, 32767] {
            let packed = pack(StorageType::I16, Value::I32(v));
            assert_eq!(unpack(StorageType::I16, packed, true), Value::I32(v));
        }
        // Truncation keeps only the low bits
        assert_eq!(pack(StorageType::I8, Value::I32(0x1FF)), Value::I32(0xFF));
        assert_eq!(unpack(StorageType::I8, Value::I32(0xFF), true), Value::I32(-1));
    }

    #[test]
    fn test_default_values() {
        assert_eq!(Value::default_for(ValueType::I32), Value::I32(0));
        assert_eq!(Value::default_for(ValueType::V128), Value::V128([0; 16]));
        let d = Value::default_for(ValueType::Ref(RefType::funcref()));
        assert!(matches!(d, Value::Ref(Ref::Null(HeapType::NoFunc))));
    }

    #[test]
    fn test_raw_roundtrip() {
        for v in [
            Value::I32(-7),
            Value::I64(1 << 40),
            Value::F32(1.5),
            Value::F64(-0.0),
            Value::V128([9; 16]),
        ] {
            let raw = ValRaw::from_value(&v).unwrap();
            assert_eq!(raw.to_value(v.typ()).unwrap(), v);
        }
    }
}
