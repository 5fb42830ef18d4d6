//! Exception tags and exception instances

use crate::ast::types::{FunctionType, TagType};
use crate::runtime::value::Value;
use std::sync::Arc;

/// An exception tag instance. Tag identity is the instance identity:
/// two modules importing the same tag share one instance.
#[derive(Debug)]
pub struct TagInstance {
    pub ty: TagType,
    /// Resolved payload signature (the tag's function type; results empty)
    pub sig: FunctionType,
}

impl TagInstance {
    pub fn new(ty: TagType, sig: FunctionType) -> TagInstance {
        TagInstance { ty, sig }
    }

    /// Number of payload values an exception with this tag carries.
    pub fn arity(&self) -> usize {
        self.sig.params.len()
    }
}

/// A thrown exception: the tag plus its payload values. This is the
/// engine-internal representation behind `exnref`.
#[derive(Debug)]
pub struct ExceptionInstance {
    pub tag: Arc<TagInstance>,
    pub values: Vec<Value>,
}

impl ExceptionInstance {
    pub fn new(tag: Arc<TagInstance>, values: Vec<Value>) -> ExceptionInstance {
        ExceptionInstance { tag, values }
    }
}
