//! Global variable instances

use crate::ast::types::GlobalType;
use crate::runtime::value::Value;
use std::sync::RwLock;

/// A global instance: type, mutability, and the current value.
#[derive(Debug)]
pub struct GlobalInstance {
    ty: GlobalType,
    value: RwLock<Value>,
}

impl GlobalInstance {
    pub fn new(ty: GlobalType, value: Value) -> GlobalInstance {
        GlobalInstance {
            ty,
            value: RwLock::new(value),
        }
    }

    pub fn ty(&self) -> GlobalType {
        self.ty
    }

    pub fn get(&self) -> Value {
        self.value.read().unwrap().clone()
    }

    /// Replace the value. Mutability is validator-enforced; the setter
    /// itself does not re-check it.
    pub fn set(&self, value: Value) {
        *self.value.write().unwrap() = value;
    }
}
