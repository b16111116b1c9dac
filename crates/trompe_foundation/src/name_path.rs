//! Dotted module paths such as `List.length`.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A path to a module field: zero or more module names followed by a field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NamePath {
    /// Module names from the root, outermost first.
    pub modules: Vec<String>,
    /// Field name.
    pub name: String,
}

impl NamePath {
    /// Creates a path.
    #[must_use]
    pub fn new(modules: Vec<String>, name: impl Into<String>) -> Self {
        Self {
            modules,
            name: name.into(),
        }
    }

    /// Creates a path to a field with no module qualifier.
    #[must_use]
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(Vec::new(), name)
    }

    /// Parses a dotted path.
    ///
    /// Returns `None` for an empty string or empty segments.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts: Vec<String> = text.split('.').map(str::to_string).collect();
        if parts.iter().any(String::is_empty) {
            return None;
        }
        let name = parts.pop()?;
        Some(Self::new(parts, name))
    }

    /// Returns true if the path has no module qualifier.
    #[must_use]
    pub fn is_bare(&self) -> bool {
        self.modules.is_empty()
    }
}

impl fmt::Display for NamePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for module in &self.modules {
            write!(f, "{module}.")?;
        }
        write!(f, "{}", self.name)
    }
}
