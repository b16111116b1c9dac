//! Source locations carried by typed tree nodes and instructions.

use std::fmt;

/// A position in source text.
///
/// The front end assigns one to every node; the compiler copies it onto each
/// emitted instruction so that the VM can map a failing pc back to a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Span {
    /// 1-based line number, or 0 when unknown.
    pub line: u32,
    /// 1-based column number, or 0 when unknown.
    pub column: u32,
}

impl Span {
    /// Creates a new span.
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Creates a span at the start of input.
    #[must_use]
    pub const fn at_start() -> Self {
        Self { line: 1, column: 1 }
    }

    /// Returns true if the front end supplied no position.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        self.line == 0
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
