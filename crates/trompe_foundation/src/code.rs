//! Compiled functions.

use std::fmt;

use crate::value::Value;

/// One compiled function or top-level unit.
///
/// A frame running this code lays out its locals as
/// `[args][copied][context arrays][temps]`, followed by up to `frame_size`
/// working values.
#[derive(Clone, Default)]
pub struct CompiledCode {
    /// Source file the code came from.
    pub file: String,
    /// Function name, or `<main>` for a unit.
    pub name: String,
    /// `(pc, line)` pairs, sorted by pc; each entry covers bytes up to the next.
    pub lines: Vec<(u32, u32)>,
    /// Encoded instruction stream.
    pub bytes: Vec<u8>,
    /// Declared arity.
    pub num_args: usize,
    /// Values captured by copy at closure creation.
    pub num_copied: usize,
    /// Outer shared arrays reached through the closure's context.
    pub num_context: usize,
    /// Temporaries, including the slot of the scope's own shared array.
    pub num_temps: usize,
    /// Maximum working-stack depth above the locals.
    pub frame_size: usize,
    /// Constant pool.
    pub consts: Vec<Value>,
}

impl CompiledCode {
    /// Number of stack slots occupied by locals.
    #[must_use]
    pub const fn num_locals(&self) -> usize {
        self.num_args + self.num_copied + self.num_context + self.num_temps
    }

    /// Returns the source line for a program counter, if known.
    #[must_use]
    pub fn line_at(&self, pc: usize) -> Option<u32> {
        let idx = self
            .lines
            .partition_point(|&(start, _)| start as usize <= pc);
        idx.checked_sub(1).map(|i| self.lines[i].1)
    }
}

impl fmt::Debug for CompiledCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledCode")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .field("num_args", &self.num_args)
            .field("num_copied", &self.num_copied)
            .field("num_context", &self.num_context)
            .field("num_temps", &self.num_temps)
            .field("frame_size", &self.frame_size)
            .field("consts", &self.consts.len())
            .finish()
    }
}
