//! Core values, compiled code, and error types for Trompe.
//!
//! This crate provides:
//! - [`Value`] - The runtime value type, including closures and shared arrays
//! - [`CompiledCode`] - Encoded functions produced by the compiler
//! - [`Type`] - Resolved types carried by the typed tree
//! - [`NamePath`] - Dotted module field paths
//! - [`Error`] - Rich error types with context
//! - [`LtList`] - Persistent list backing the language's lists

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod code;
pub mod collections;
pub mod error;
pub mod name_path;
pub mod types;
pub mod value;

pub use code::CompiledCode;
pub use collections::LtList;
pub use error::{Error, ErrorContext, ErrorKind};
pub use name_path::NamePath;
pub use types::Type;
pub use value::{ArrayRef, BlockClosure, ClosureKind, NativeFn, Primitive, Value};

/// Result type alias using the Trompe error type.
pub type Result<T> = std::result::Result<T, Error>;
