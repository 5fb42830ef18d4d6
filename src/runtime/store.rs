//! The store: a registry of named instances
//!
//! The store holds strong ownership of registered (named) module and
//! component instances and resolves imports against them by
//! `(module_name, field_name)`. Anonymous instances returned by
//! instantiation are owned by the caller; registering one hands its
//! ownership to the store.

use crate::runtime::component::ComponentInstance;
use crate::runtime::module::{ExternVal, ModuleInstance};
use crate::runtime::InstantiateError;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of named module and component instances.
#[derive(Debug, Default)]
pub struct Store {
    modules: HashMap<String, Arc<ModuleInstance>>,
    components: HashMap<String, Arc<ComponentInstance>>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    /// Register a module instance under a name.
    ///
    /// # Errors
    /// - `ModuleNameConflict` if the name is already taken
    pub fn register_module(&mut self, name: &str, inst: Arc<ModuleInstance>) -> Result<(), InstantiateError> {
        if self.modules.contains_key(name) {
            return Err(InstantiateError::ModuleNameConflict(name.to_string()));
        }
        inst.set_name(name);
        self.modules.insert(name.to_string(), inst);
        Ok(())
    }

    /// Register a component instance under a name.
    pub fn register_component(&mut self, name: &str, inst: Arc<ComponentInstance>) -> Result<(), InstantiateError> {
        if self.components.contains_key(name) {
            return Err(InstantiateError::ModuleNameConflict(name.to_string()));
        }
        inst.set_name(name);
        self.components.insert(name.to_string(), inst);
        Ok(())
    }

    pub fn module(&self, name: &str) -> Option<&Arc<ModuleInstance>> {
        self.modules.get(name)
    }

    pub fn component(&self, name: &str) -> Option<&Arc<ComponentInstance>> {
        self.components.get(name)
    }

    /// Resolve an import by `(module_name, field_name)`.
    pub fn resolve(&self, module: &str, field: &str) -> Option<ExternVal> {
        self.modules.get(module).and_then(|m| m.export(field))
    }

    /// Remove a registered module, returning it if present.
    pub fn unregister_module(&mut self, name: &str) -> Option<Arc<ModuleInstance>> {
        self.modules.remove(name)
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    /// Iterate over every registered module instance.
    pub fn modules(&self) -> impl Iterator<Item = &Arc<ModuleInstance>> {
        self.modules.values()
    }
}
