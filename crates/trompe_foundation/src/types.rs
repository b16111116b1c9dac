//! Resolved types attached to typed tree nodes.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A type as resolved by the type checker.
///
/// The back end only inspects types to pick specialized instructions
/// (integer comparisons, for instance); everything else is carried through.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    /// The unit type.
    Unit,
    /// Boolean type.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// Unicode scalar.
    Char,
    /// String type.
    String,
    /// Immutable list.
    List(Box<Type>),
    /// Mutable array.
    Array(Box<Type>),
    /// Fixed-size tuple.
    Tuple(Vec<Type>),
    /// Function from parameter types to a result type.
    Fn(Vec<Type>, Box<Type>),
    /// Unresolved type variable.
    Var(u32),
    /// Any type.
    Any,
}

impl Type {
    /// Creates a list type with the given element type.
    #[must_use]
    pub fn list(element: Type) -> Self {
        Self::List(Box::new(element))
    }

    /// Creates an array type with the given element type.
    #[must_use]
    pub fn array(element: Type) -> Self {
        Self::Array(Box::new(element))
    }

    /// Creates a function type.
    #[must_use]
    pub fn func(params: Vec<Type>, result: Type) -> Self {
        Self::Fn(params, Box::new(result))
    }

    /// Returns true if this is the integer type.
    #[must_use]
    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int)
    }

    /// Returns true if this type is `Any`.
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "unit"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Char => write!(f, "char"),
            Self::String => write!(f, "string"),
            Self::List(t) => write!(f, "{t} list"),
            Self::Array(t) => write!(f, "{t} array"),
            Self::Tuple(ts) => {
                write!(f, "(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " * ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            Self::Fn(params, result) => {
                for p in params {
                    write!(f, "{p} -> ")?;
                }
                write!(f, "{result}")
            }
            Self::Var(n) => write!(f, "'t{n}"),
            Self::Any => write!(f, "any"),
        }
    }
}
