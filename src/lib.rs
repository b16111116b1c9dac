//! Trompe - back end for an ML-family language
//!
//! This crate re-exports all layers of the Trompe back end for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 2: trompe_runtime    Sessions, object files
//! Layer 1: trompe_language   Closure analysis, emitter, compiler, bytecode VM
//! Layer 0: trompe_foundation Core types (Value, CompiledCode, Error)
//! ```

pub use trompe_foundation as foundation;
pub use trompe_language as language;
pub use trompe_runtime as runtime;
