//! Modules and the registry that owns them.
//!
//! A [`Module`] is a mutable table of named fields plus a list of imported
//! modules. The [`ModuleRegistry`] is the explicit context object holding the
//! module tree, the list of implicitly opened modules, and the primitive
//! table; it is passed to the compiler and the VM instead of living in a
//! global.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use trompe_foundation::{Error, ErrorKind, NamePath, Primitive, Result, Value};

/// Shared handle to a module.
pub type ModuleRef = Rc<Module>;

// =============================================================================
// Module
// =============================================================================

/// A module: named fields, imports, and submodules.
pub struct Module {
    path: Vec<String>,
    fields: RefCell<HashMap<String, Value>>,
    imports: RefCell<Vec<ModuleRef>>,
    submodules: RefCell<HashMap<String, ModuleRef>>,
}

impl Module {
    /// Creates a detached module with the given path from the root.
    #[must_use]
    pub fn new(path: Vec<String>) -> ModuleRef {
        Rc::new(Self {
            path,
            fields: RefCell::new(HashMap::new()),
            imports: RefCell::new(Vec::new()),
            submodules: RefCell::new(HashMap::new()),
        })
    }

    /// Module name; the root's name is empty.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.last().map_or("", String::as_str)
    }

    /// Module names from the root to this module.
    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Returns the submodule with this name, creating it if needed.
    pub fn submodule(&self, name: &str) -> ModuleRef {
        self.submodules
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| {
                let mut path = self.path.clone();
                path.push(name.to_string());
                Self::new(path)
            })
            .clone()
    }

    /// Returns an existing submodule.
    #[must_use]
    pub fn find_submodule(&self, name: &str) -> Option<ModuleRef> {
        self.submodules.borrow().get(name).cloned()
    }

    /// Looks up a field of this module only.
    #[must_use]
    pub fn find_field_value(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }

    /// Defines or replaces a field.
    pub fn set_field_value(&self, name: &str, value: Value) {
        self.fields.borrow_mut().insert(name.to_string(), value);
    }

    /// Returns true if the module itself defines the field.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.borrow().contains_key(name)
    }

    /// Field names, sorted.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Adds an import, consulted after the module's own fields.
    pub fn import(&self, module: ModuleRef) {
        self.imports.borrow_mut().push(module);
    }

    /// Imported modules, in import order.
    #[must_use]
    pub fn imports(&self) -> Vec<ModuleRef> {
        self.imports.borrow().clone()
    }

    /// Looks up a field here, then in each import.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Value> {
        self.find_field_value(name).or_else(|| {
            self.imports
                .borrow()
                .iter()
                .find_map(|m| m.find_field_value(name))
        })
    }

    /// Path of a field defined in this module.
    #[must_use]
    pub fn field_path(&self, name: &str) -> NamePath {
        NamePath::new(self.path.clone(), name)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("path", &self.path)
            .field("fields", &self.field_names())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// PrimitiveTable
// =============================================================================

/// Native functions by name.
#[derive(Clone, Default)]
pub struct PrimitiveTable {
    entries: HashMap<&'static str, Primitive>,
}

impl PrimitiveTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a primitive, replacing any previous one with the same name.
    pub fn register(&mut self, primitive: Primitive) {
        self.entries.insert(primitive.name, primitive);
    }

    /// Looks up a primitive.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Primitive> {
        self.entries.get(name)
    }

    /// Number of registered primitives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered primitives, sorted by name.
    #[must_use]
    pub fn sorted(&self) -> Vec<&Primitive> {
        let mut all: Vec<&Primitive> = self.entries.values().collect();
        all.sort_by_key(|p| p.name);
        all
    }
}

// =============================================================================
// ModuleRegistry
// =============================================================================

/// Name of the module holding the pervasive primitives.
pub const PERVASIVES: &str = "Pervasives";

/// The module tree, the opened-module list, and the primitive table.
pub struct ModuleRegistry {
    root: ModuleRef,
    opened: Vec<ModuleRef>,
    primitives: PrimitiveTable,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    /// Creates a registry with an empty root and no primitives.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Module::new(Vec::new()),
            opened: Vec::new(),
            primitives: PrimitiveTable::new(),
        }
    }

    /// Creates a registry whose `Pervasives` module holds every builtin
    /// primitive and is opened.
    #[must_use]
    pub fn with_pervasives() -> Self {
        let mut registry = Self::new();
        let pervasives = registry.define_module(&[PERVASIVES]);
        for primitive in crate::vm::pervasives() {
            pervasives.set_field_value(primitive.name, Value::Primitive(primitive.clone()));
            registry.primitives.register(primitive);
        }
        registry.open(pervasives);
        registry
    }

    /// The root module.
    #[must_use]
    pub const fn root(&self) -> &ModuleRef {
        &self.root
    }

    /// Returns the module at `path`, creating missing modules on the way.
    pub fn define_module(&self, path: &[&str]) -> ModuleRef {
        path.iter()
            .fold(self.root.clone(), |module, name| module.submodule(name))
    }

    /// Returns the module at `path`, if it exists.
    #[must_use]
    pub fn module(&self, path: &[String]) -> Option<ModuleRef> {
        path.iter()
            .try_fold(self.root.clone(), |module, name| module.find_submodule(name))
    }

    /// Opens a module; opened modules are consulted in opening order.
    pub fn open(&mut self, module: ModuleRef) {
        if !self.opened.iter().any(|m| Rc::ptr_eq(m, &module)) {
            self.opened.push(module);
        }
    }

    /// Opened modules, in opening order.
    #[must_use]
    pub fn opened(&self) -> &[ModuleRef] {
        &self.opened
    }

    /// The primitive table.
    #[must_use]
    pub const fn primitives(&self) -> &PrimitiveTable {
        &self.primitives
    }

    /// Registers a primitive without exposing it as a module field.
    pub fn register_primitive(&mut self, primitive: Primitive) {
        self.primitives.register(primitive);
    }

    /// Resolves an attribute for code running in `module`: the module, its
    /// imports, then the opened modules.
    #[must_use]
    pub fn resolve_attribute(&self, module: &Module, name: &str) -> Option<Value> {
        module
            .resolve(name)
            .or_else(|| self.opened.iter().find_map(|m| m.find_field_value(name)))
    }

    /// Finds which imported or opened module provides `name` for code in
    /// `module`, returning the field's full path.
    #[must_use]
    pub fn find_binding(&self, module: &Module, name: &str) -> Option<NamePath> {
        module
            .imports()
            .iter()
            .chain(self.opened.iter())
            .find(|m| m.has_field(name))
            .map(|m| m.field_path(name))
    }

    /// Resolves a qualified path; a bare path resolves like an attribute of
    /// `module`.
    ///
    /// # Errors
    ///
    /// Returns `ModuleNotFound` or `AttributeNotFound`.
    pub fn find_field_value_of_path(&self, module: &Module, path: &NamePath) -> Result<Value> {
        if path.is_bare() {
            return self
                .resolve_attribute(module, &path.name)
                .ok_or_else(|| Error::attribute_not_found(module.name(), &path.name));
        }
        let target = self
            .module(&path.modules)
            .ok_or_else(|| Error::new(ErrorKind::ModuleNotFound(path.modules.join("."))))?;
        target
            .find_field_value(&path.name)
            .ok_or_else(|| Error::attribute_not_found(path.modules.join("."), &path.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submodules_have_paths() {
        let registry = ModuleRegistry::new();
        let list = registry.define_module(&["Std", "List"]);
        assert_eq!(list.name(), "List");
        assert_eq!(list.path(), &["Std".to_string(), "List".to_string()]);
        let again = registry.module(&["Std".to_string(), "List".to_string()]);
        assert!(Rc::ptr_eq(&list, &again.unwrap()));
    }

    #[test]
    fn resolve_order_module_imports_opened() {
        let mut registry = ModuleRegistry::new();
        let main = registry.define_module(&["Main"]);
        let imported = registry.define_module(&["Imported"]);
        let opened = registry.define_module(&["Opened"]);
        main.import(imported.clone());
        registry.open(opened.clone());

        opened.set_field_value("x", Value::Int(3));
        assert_eq!(registry.resolve_attribute(&main, "x"), Some(Value::Int(3)));
        imported.set_field_value("x", Value::Int(2));
        assert_eq!(registry.resolve_attribute(&main, "x"), Some(Value::Int(2)));
        main.set_field_value("x", Value::Int(1));
        assert_eq!(registry.resolve_attribute(&main, "x"), Some(Value::Int(1)));
    }

    #[test]
    fn opened_modules_first_match_wins() {
        let mut registry = ModuleRegistry::new();
        let main = registry.define_module(&["Main"]);
        let a = registry.define_module(&["A"]);
        let b = registry.define_module(&["B"]);
        a.set_field_value("v", Value::Int(1));
        b.set_field_value("v", Value::Int(2));
        registry.open(b);
        registry.open(a);
        assert_eq!(registry.resolve_attribute(&main, "v"), Some(Value::Int(2)));
        assert_eq!(
            registry.find_binding(&main, "v"),
            Some(NamePath::new(vec!["B".to_string()], "v"))
        );
    }

    #[test]
    fn path_errors() {
        let registry = ModuleRegistry::new();
        let main = registry.define_module(&["Main"]);
        let err = registry
            .find_field_value_of_path(&main, &NamePath::parse("Nope.x").unwrap())
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ModuleNotFound(_)));
        let err = registry
            .find_field_value_of_path(&main, &NamePath::parse("Main.x").unwrap())
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::AttributeNotFound { .. }));
    }

    #[test]
    fn pervasives_are_opened() {
        let registry = ModuleRegistry::with_pervasives();
        let main = registry.define_module(&["Main"]);
        assert!(registry.primitives().get("array_get").is_some());
        assert!(matches!(
            registry.resolve_attribute(&main, "string_of_int"),
            Some(Value::Primitive(_))
        ));
        assert_eq!(
            registry.find_binding(&main, "array_length"),
            Some(NamePath::new(vec![PERVASIVES.to_string()], "array_length"))
        );
    }
}
