//! Closure analysis, bytecode compiler, and stack VM for Trompe.
//!
//! This crate provides:
//! - [`TypedNode`] - The typed tree the front end hands over
//! - [`Analyzer`] - Closure-capture analysis and scope resolution
//! - [`LocalScope`] - Frame slots and shared arrays of one function
//! - [`Emitter`] - Label-based instruction buffer and variable-width encoder
//! - [`Compiler`] - Typed tree to [`CompiledCode`]
//! - [`Vm`] - Stack-based bytecode interpreter
//! - [`ModuleRegistry`] - Modules, opened modules, and primitives
//!
//! # Example
//!
//! ```
//! use trompe_language::{ModuleRegistry, TypedNode, Value, compile_and_run};
//! use trompe_language::typed_tree::BinaryOp;
//!
//! let registry = ModuleRegistry::with_pervasives();
//! let module = registry.define_module(&["Main"]);
//! let tree = TypedNode::binary(BinaryOp::Add, TypedNode::int(2), TypedNode::int(3));
//! assert_eq!(compile_and_run(&tree, &registry, &module).unwrap(), Value::Int(5));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod builder;
pub mod compiler;
pub mod config;
pub mod disasm;
pub mod emitter;
pub mod instr;
pub mod module;
pub mod opcode;
pub mod scope;
pub mod span;
pub mod typed_tree;
pub mod vm;

use std::rc::Rc;

pub use compiler::Compiler;
pub use config::{CompilerConfig, VmConfig};
pub use disasm::disassemble;
pub use emitter::Emitter;
pub use module::{Module, ModuleRef, ModuleRegistry};
pub use opcode::Opcode;
pub use scope::{Analysis, Analyzer, LocalScope};
pub use span::Span;
pub use typed_tree::TypedNode;
pub use vm::{ModuleContext, Vm, VmContext};

pub use trompe_foundation::{CompiledCode, Error, ErrorKind, Result, Value};

/// Compiles a tree with the default configuration.
///
/// # Errors
///
/// Returns analysis or encoding errors.
pub fn compile(
    tree: &TypedNode,
    registry: &ModuleRegistry,
    module: &Module,
) -> Result<CompiledCode> {
    Compiler::new(registry, module, CompilerConfig::default()).compile(tree)
}

/// Compiles a tree and runs it on a fresh VM.
///
/// # Errors
///
/// Returns compile errors or runtime errors.
pub fn compile_and_run(
    tree: &TypedNode,
    registry: &ModuleRegistry,
    module: &Module,
) -> Result<Value> {
    let code = compile(tree, registry, module)?;
    Vm::new().execute(Rc::new(code), &ModuleContext::new(registry, module))
}
