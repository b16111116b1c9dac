//! Persistent list with structural sharing.
//!
//! A thin wrapper around `im::Vector` giving the language's immutable lists
//! cheap `head`, `tail` and `cons`.

use std::fmt;
use std::iter::FromIterator;

/// Persistent list.
///
/// Cloning is O(1). `cons` and `tail` return new lists sharing structure with
/// the receiver.
#[derive(Clone, Default)]
pub struct LtList<T>(im::Vector<T>)
where
    T: Clone;

impl<T: Clone> LtList<T> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self(im::Vector::new())
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the first element.
    #[must_use]
    pub fn head(&self) -> Option<&T> {
        self.0.front()
    }

    /// Returns the list without its first element.
    #[must_use]
    pub fn tail(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0.skip(1)))
        }
    }

    /// Returns a new list with `value` prepended.
    #[must_use]
    pub fn cons(&self, value: T) -> Self {
        let mut new = self.0.clone();
        new.push_front(value);
        Self(new)
    }

    /// Gets an element by index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.0.get(index)
    }

    /// Returns an iterator over the elements.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }
}

impl<T: Clone + PartialEq> PartialEq for LtList<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Clone + fmt::Debug> fmt::Debug for LtList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl<T: Clone> FromIterator<T> for LtList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T: Clone> From<Vec<T>> for LtList<T> {
    fn from(vec: Vec<T>) -> Self {
        Self(vec.into_iter().collect())
    }
}
