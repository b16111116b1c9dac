//! Integration tests for trompe_runtime
//!
//! Tests sessions that run several units against one module, and object
//! files that carry a unit between sessions.

mod object_file;
mod session;
