//! Integration tests for Layer 1: Language
//!
//! Tests for capture analysis, the emitter, the compiler, and the VM.

mod capture;
mod compiler;
mod properties;
mod vm;
