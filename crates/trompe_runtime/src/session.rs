//! Compilation sessions.
//!
//! A [`Session`] owns a module registry, the module its units run in, and
//! one VM. Each unit is compiled against the module's current attributes,
//! so later units see the globals earlier units declared.

use std::path::Path;
use std::rc::Rc;

use tracing::{debug, instrument};
use trompe_foundation::{CompiledCode, Result, Value};
use trompe_language::{
    Compiler, CompilerConfig, ModuleContext, ModuleRef, ModuleRegistry, TypedNode, Vm, VmConfig,
};

use crate::object_file::ObjectFile;

/// Configuration for a session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Name of the module units run in.
    pub module_name: String,
    /// Compiler settings.
    pub compiler: CompilerConfig,
    /// VM settings.
    pub vm: VmConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            module_name: "Main".to_string(),
            compiler: CompilerConfig::default(),
            vm: VmConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Configuration with frame-size checking enabled.
    #[must_use]
    pub fn checked() -> Self {
        Self {
            vm: VmConfig::checked(),
            ..Self::default()
        }
    }

    /// Builder method to set the module name.
    #[must_use]
    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    /// Builder method to set the compiler configuration.
    #[must_use]
    pub fn with_compiler(mut self, compiler: CompilerConfig) -> Self {
        self.compiler = compiler;
        self
    }

    /// Builder method to set the VM configuration.
    #[must_use]
    pub fn with_vm(mut self, vm: VmConfig) -> Self {
        self.vm = vm;
        self
    }
}

/// Compiles and runs units against one module.
pub struct Session {
    config: SessionConfig,
    registry: ModuleRegistry,
    module: ModuleRef,
    vm: Vm,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates a session with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Creates a session with the given configuration.
    #[must_use]
    pub fn with_config(config: SessionConfig) -> Self {
        let registry = ModuleRegistry::with_pervasives();
        let module = registry.define_module(&[config.module_name.as_str()]);
        Self {
            vm: Vm::with_config(config.vm.clone()),
            config,
            registry,
            module,
        }
    }

    /// The session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The module registry.
    #[must_use]
    pub const fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Mutable access to the registry, for registering primitives and
    /// opening modules.
    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    /// The module units run in.
    #[must_use]
    pub const fn module(&self) -> &ModuleRef {
        &self.module
    }

    /// Returns a global of the session module.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        self.module.find_field_value(name)
    }

    /// Compiles a unit without running it.
    ///
    /// # Errors
    ///
    /// Returns analysis or encoding errors.
    pub fn compile(&self, tree: &TypedNode) -> Result<CompiledCode> {
        Compiler::new(&self.registry, &self.module, self.config.compiler.clone()).compile(tree)
    }

    /// Runs a compiled unit.
    ///
    /// The value stack is reset afterwards, whether or not the unit failed.
    ///
    /// # Errors
    ///
    /// Returns any runtime error raised by the unit.
    #[instrument(skip_all, fields(unit = %code.name))]
    pub fn execute(&mut self, code: Rc<CompiledCode>) -> Result<Value> {
        debug!("unit start");
        let result = self
            .vm
            .execute(code, &ModuleContext::new(&self.registry, &self.module));
        self.vm.reset();
        debug!(ok = result.is_ok(), "unit end");
        result
    }

    /// Compiles and runs a unit.
    ///
    /// # Errors
    ///
    /// Returns compile or runtime errors.
    pub fn eval(&mut self, tree: &TypedNode) -> Result<Value> {
        let code = self.compile(tree)?;
        self.execute(Rc::new(code))
    }

    /// Applies a callable, typically a function some unit returned or
    /// declared.
    ///
    /// # Errors
    ///
    /// Returns `NotCallable`, `ArityMismatch`, or the callee's errors.
    pub fn apply(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value> {
        let result = self
            .vm
            .apply(callee, args, &ModuleContext::new(&self.registry, &self.module));
        self.vm.reset();
        result
    }

    // =========================================================================
    // Object files
    // =========================================================================

    /// Compiles and runs a unit, then saves it with the module's attributes.
    ///
    /// # Errors
    ///
    /// Returns compile, runtime, serialization or I/O errors.
    pub fn compile_to_file<P: AsRef<Path>>(&mut self, tree: &TypedNode, path: P) -> Result<Value> {
        let code = Rc::new(self.compile(tree)?);
        let value = self.execute(Rc::clone(&code))?;
        ObjectFile::from_unit(&code, &self.module)?.save_to_file(path)?;
        Ok(value)
    }

    /// Loads an object file into the registry and runs its entry code in
    /// the object's module.
    ///
    /// # Errors
    ///
    /// Returns load errors or any runtime error raised by the entry code.
    pub fn load_object(&mut self, object: &ObjectFile) -> Result<Value> {
        let (entry, module) = object.load(&self.registry)?;
        debug!(module = %module.name(), "running loaded unit");
        let result = self
            .vm
            .execute(entry, &ModuleContext::new(&self.registry, &module));
        self.vm.reset();
        result
    }
}
