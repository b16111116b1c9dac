//! Closure-capture analysis and local scopes.
//!
//! Analysis runs in two steps:
//!
//! 1. [`Analyzer::analyze`] walks a unit's typed tree and produces an
//!    [`Analysis`]: one [`AnalysisBlock`] per function literal plus one for the
//!    unit, every variable with its storage [`Roles`], and how each identifier
//!    resolved.
//! 2. [`Analysis::finish`] turns a block into a [`LocalScope`] with concrete
//!    frame slots and shared-array positions.
//!
//! # Module Structure
//!
//! - `types` - Blocks, variables and roles
//! - `analyzer` - The tree walk
//! - `local` - Slot assignment and closure classification

mod analyzer;
mod local;
mod types;

#[cfg(test)]
mod tests;

pub use analyzer::{Analysis, Analyzer, Resolution};
pub use local::{LocalScope, SharedGroup, SlotKind, VarLocation};
pub use types::{
    AnalysisBlock, AnalysisVar, BlockId, BlockKind, GroupKey, LoopId, Role, Roles, VarId,
};
