//! Error types for the Trompe back end.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::types::Type;

/// The main error type for Trompe operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Adds context unless the error already carries some.
    ///
    /// Errors raised deep in a call chain keep the innermost location.
    #[must_use]
    pub fn or_context(self, context: impl FnOnce() -> ErrorContext) -> Self {
        if self.context.is_some() {
            self
        } else {
            self.with_context(context())
        }
    }

    /// Creates an unbound identifier error.
    #[must_use]
    pub fn unbound_identifier(name: impl Into<String>, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::UnboundIdentifier {
            name: name.into(),
            line,
            column,
        })
    }

    /// Creates an arity mismatch error.
    #[must_use]
    pub fn arity_mismatch(expected: usize, actual: usize) -> Self {
        Self::new(ErrorKind::ArityMismatch { expected, actual })
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: Type, actual: Type) -> Self {
        Self::new(ErrorKind::TypeMismatch { expected, actual })
    }

    /// Creates a key not found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound(key.into()))
    }

    /// Creates an attribute not found error.
    #[must_use]
    pub fn attribute_not_found(module: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::new(ErrorKind::AttributeNotFound {
            module: module.into(),
            attribute: attribute.into(),
        })
    }

    /// Creates an illegal backward branch error.
    #[must_use]
    pub fn illegal_backward_branch(pc: usize, target: usize) -> Self {
        Self::new(ErrorKind::IllegalBackwardBranch { pc, target })
    }

    /// Creates an operand out of range error.
    #[must_use]
    pub fn operand_out_of_range(what: &'static str, value: i64) -> Self {
        Self::new(ErrorKind::OperandOutOfRange { what, value })
    }

    /// Creates a malformed bytecode error.
    #[must_use]
    pub fn malformed(pc: usize, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedBytecode {
            pc,
            message: message.into(),
        })
    }

    /// Creates a primitive error.
    #[must_use]
    pub fn primitive(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Primitive {
            name: name.into(),
            message: message.into(),
        })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    /// Returns true for errors that indicate a defect in the compiler or VM
    /// rather than in the program being run.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::NotFound(_)
                | ErrorKind::IllegalBackwardBranch { .. }
                | ErrorKind::UnresolvedLabel(_)
                | ErrorKind::OperandOutOfRange { .. }
                | ErrorKind::AddressesUnsettled { .. }
                | ErrorKind::MalformedBytecode { .. }
                | ErrorKind::FrameSizeExceeded { .. }
                | ErrorKind::Internal(_)
        )
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A name resolved to no temporary, ancestor, global, or module binding.
    #[error("unbound identifier `{name}` at {line}:{column}")]
    UnboundIdentifier {
        /// The identifier.
        name: String,
        /// Line number (1-indexed).
        line: u32,
        /// Column number (1-indexed).
        column: u32,
    },

    /// Wrong number of arguments to a closure or primitive.
    #[error("arity mismatch: expected {expected}, got {actual}")]
    ArityMismatch {
        /// Declared arity of the callee.
        expected: usize,
        /// Number of arguments supplied.
        actual: usize,
    },

    /// A local name or constant that analysis guaranteed was missing at run time.
    #[error("key not found: {0}")]
    NotFound(String),

    /// Module attribute lookup failed.
    #[error("attribute not found: {attribute} in module {module}")]
    AttributeNotFound {
        /// Module that was searched.
        module: String,
        /// Attribute name.
        attribute: String,
    },

    /// Module path did not resolve.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// Type mismatch during a runtime operation.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected type.
        expected: Type,
        /// The actual type encountered.
        actual: Type,
    },

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Index out of bounds.
    #[error("index out of bounds: {index} (length {length})")]
    IndexOutOfBounds {
        /// The index that was accessed.
        index: i64,
        /// The actual length of the collection.
        length: usize,
    },

    /// No case arm matched the scrutinee.
    #[error("match failure: {0}")]
    MatchFailure(String),

    /// Applied a value that is neither a closure nor a primitive.
    #[error("not callable: {0}")]
    NotCallable(String),

    /// Error raised by a primitive.
    #[error("primitive {name} failed: {message}")]
    Primitive {
        /// Primitive name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// Backward branch whose target is not a loop head.
    #[error("illegal backward branch at pc {pc}: target {target} is not a loop head")]
    IllegalBackwardBranch {
        /// Program counter of the branch.
        pc: usize,
        /// Program counter of the target.
        target: usize,
    },

    /// Jump to a label that was never placed.
    #[error("unresolved label L{0}")]
    UnresolvedLabel(u32),

    /// An operand does not fit any encoding of its instruction.
    #[error("operand out of range for {what}: {value}")]
    OperandOutOfRange {
        /// What the operand denotes.
        what: &'static str,
        /// The offending value.
        value: i64,
    },

    /// Jump sizes kept changing after the configured number of passes.
    #[error("instruction addresses did not settle after {passes} passes")]
    AddressesUnsettled {
        /// Passes performed.
        passes: usize,
    },

    /// Byte stream could not be decoded.
    #[error("malformed bytecode at pc {pc}: {message}")]
    MalformedBytecode {
        /// Offset of the failing instruction.
        pc: usize,
        /// Description.
        message: String,
    },

    /// Working stack grew past the computed frame size.
    #[error("frame size exceeded in {code}: depth {depth} > frame size {frame_size}")]
    FrameSizeExceeded {
        /// Code name.
        code: String,
        /// Declared frame size.
        frame_size: usize,
        /// Observed depth.
        depth: usize,
    },

    /// Object file encoding failed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// File access failed.
    #[error("io error: {0}")]
    IoError(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Context about where an error occurred.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Source file or code name.
    pub source: Option<String>,
    /// Line number in source.
    pub line: Option<usize>,
    /// Column number in source.
    pub column: Option<usize>,
    /// Active calls, innermost first.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: None,
            line: None,
            column: None,
            stack: Vec::new(),
        }
    }

    /// Sets the source location.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the line.
    #[must_use]
    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// Sets the line and column.
    #[must_use]
    pub fn with_position(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "at {source}")?;
            match (self.line, self.column) {
                (Some(line), Some(col)) => write!(f, ":{line}:{col}")?,
                (Some(line), None) => write!(f, ":{line}")?,
                _ => {}
            }
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}
