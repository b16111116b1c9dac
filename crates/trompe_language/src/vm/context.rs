//! Module access and call frames for VM execution.
//!
//! The VM reaches module attributes and primitives only through the
//! [`VmContext`] trait; [`ModuleContext`] implements it over a
//! [`ModuleRegistry`] and the module the code runs in.

use std::rc::Rc;

use trompe_foundation::{BlockClosure, Error, NamePath, Primitive, Result, Value};

use crate::module::{Module, ModuleRegistry};

// =============================================================================
// VmContext Trait
// =============================================================================

/// Global state visible to running code.
pub trait VmContext {
    /// Resolves a module attribute by name.
    ///
    /// # Errors
    ///
    /// Returns `AttributeNotFound` if no visible module defines `name`.
    fn load_global(&self, name: &str) -> Result<Value>;

    /// Sets an attribute of the current module.
    fn store_global(&self, name: &str, value: Value);

    /// Resolves a qualified path.
    ///
    /// # Errors
    ///
    /// Returns `ModuleNotFound` or `AttributeNotFound`.
    fn load_path(&self, path: &NamePath) -> Result<Value>;

    /// Looks up a primitive by name.
    fn primitive(&self, name: &str) -> Option<&Primitive>;
}

/// Runs code inside one module of a registry.
pub struct ModuleContext<'a> {
    registry: &'a ModuleRegistry,
    module: &'a Module,
}

impl<'a> ModuleContext<'a> {
    /// Creates a context for code running in `module`.
    #[must_use]
    pub const fn new(registry: &'a ModuleRegistry, module: &'a Module) -> Self {
        Self { registry, module }
    }
}

impl VmContext for ModuleContext<'_> {
    fn load_global(&self, name: &str) -> Result<Value> {
        self.registry
            .resolve_attribute(self.module, name)
            .ok_or_else(|| Error::attribute_not_found(self.module.name(), name))
    }

    fn store_global(&self, name: &str, value: Value) {
        self.module.set_field_value(name, value);
    }

    fn load_path(&self, path: &NamePath) -> Result<Value> {
        self.registry.find_field_value_of_path(self.module, path)
    }

    fn primitive(&self, name: &str) -> Option<&Primitive> {
        self.registry.primitives().get(name)
    }
}

// =============================================================================
// Frames
// =============================================================================

/// One active call.
pub(crate) struct Frame {
    /// The running closure.
    pub closure: Rc<BlockClosure>,
    /// Offset of the next instruction.
    pub pc: usize,
    /// Stack slot of local 0.
    pub base: usize,
    /// Stack height to restore on return, before pushing the result.
    pub return_to: usize,
}

impl Frame {
    pub(crate) fn new(closure: Rc<BlockClosure>, base: usize, return_to: usize) -> Self {
        Self {
            closure,
            pc: 0,
            base,
            return_to,
        }
    }

    /// First slot above the locals.
    pub(crate) fn working_base(&self) -> usize {
        self.base + self.closure.code.num_locals()
    }

    pub(crate) fn name(&self) -> &str {
        &self.closure.code.name
    }
}
