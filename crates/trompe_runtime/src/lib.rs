//! Sessions and object files for Trompe.
//!
//! This crate provides:
//! - [`Session`] - Compiles and runs units against one module
//! - [`ObjectFile`] - Compiled units saved to and loaded from `MessagePack`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod object_file;
pub mod session;

pub use object_file::ObjectFile;
pub use session::{Session, SessionConfig};
