//! Sorted string sets
//!
//! Used by the meta-query paths to combine tag-key results with set
//! algebra.

use std::collections::BTreeSet;

/// A set of strings with sorted iteration and union/intersection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringSet(BTreeSet<String>);

impl StringSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string to the set
    pub fn add(&mut self, s: impl Into<String>) {
        self.0.insert(s.into());
    }

    /// Check membership
    pub fn contains(&self, s: &str) -> bool {
        self.0.contains(s)
    }

    /// The elements in sorted order
    pub fn list(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }

    /// Union of this set and another
    pub fn union(&self, other: &StringSet) -> StringSet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    /// Intersection of this set and another
    pub fn intersect(&self, other: &StringSet) -> StringSet {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for StringSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for StringSet {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        Self(iter.into_iter().map(String::from).collect())
    }
}
