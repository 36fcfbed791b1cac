//! Core data model for the measurement index
//!
//! This module defines the tag structures shared between writers and the
//! index:
//!
//! - `Tag`: a single key/value attribute on a series
//! - `Tags`: an ordered, key-unique collection of tags
//! - `make_tags_key`: the canonical group-key serialization used by GROUP BY

use serde::{Deserialize, Serialize};

/// A single tag: a small, indexed string attribute on a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key (e.g. "host")
    pub key: String,
    /// Tag value (e.g. "server01")
    pub value: String,
}

impl Tag {
    /// Create a new tag
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An immutable collection of tags, sorted by key with unique keys
///
/// Construction sorts and deduplicates; afterwards the collection is never
/// mutated. Callers that need a private mutable copy clone it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags(Vec<Tag>);

impl Tags {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build from key/value pairs, sorting by key and keeping the first
    /// occurrence of a duplicated key
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut tags: Vec<Tag> = pairs
            .into_iter()
            .map(|(k, v)| Tag::new(k, v))
            .collect();
        tags.sort_by(|a, b| a.key.cmp(&b.key));
        tags.dedup_by(|a, b| a.key == b.key);
        Self(tags)
    }

    /// Look up the value for a tag key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .binary_search_by(|t| t.key.as_str().cmp(key))
            .ok()
            .map(|i| self.0[i].value.as_str())
    }

    /// Iterate the tags in key order
    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.0.iter()
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no tags
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Serialize the values of the given dimension keys into a canonical group
/// key.
///
/// The keys must already be sorted. Each dimension contributes `dim=value`,
/// joined by commas; a dimension the series does not carry contributes an
/// empty value, so series missing a tag still group deterministically.
pub fn make_tags_key(dims: &[String], tags: &Tags) -> Vec<u8> {
    let mut key = Vec::with_capacity(dims.len() * 16);
    for (i, dim) in dims.iter().enumerate() {
        if i > 0 {
            key.push(b',');
        }
        key.extend_from_slice(dim.as_bytes());
        key.push(b'=');
        if let Some(value) = tags.get(dim) {
            key.extend_from_slice(value.as_bytes());
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_sorted_and_unique() {
        let tags = Tags::from_pairs([("region", "east"), ("host", "a"), ("region", "west")]);

        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("host"), Some("a"));
        assert_eq!(tags.get("region"), Some("east"));
        assert_eq!(tags.get("missing"), None);

        let keys: Vec<&str> = tags.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["host", "region"]);
    }

    #[test]
    fn test_tags_serialization() {
        let tags = Tags::from_pairs([("host", "a"), ("region", "east")]);
        let json = serde_json::to_string(&tags).unwrap();
        let restored: Tags = serde_json::from_str(&json).unwrap();

        assert_eq!(tags, restored);
    }

    #[test]
    fn test_make_tags_key() {
        let tags = Tags::from_pairs([("host", "a"), ("region", "east")]);

        let dims = vec!["region".to_string()];
        assert_eq!(make_tags_key(&dims, &tags), b"region=east".to_vec());

        let dims = vec!["host".to_string(), "region".to_string()];
        assert_eq!(
            make_tags_key(&dims, &tags),
            b"host=a,region=east".to_vec()
        );
    }

    #[test]
    fn test_make_tags_key_missing_dimension() {
        let tags = Tags::from_pairs([("host", "a")]);
        let dims = vec!["host".to_string(), "region".to_string()];

        assert_eq!(make_tags_key(&dims, &tags), b"host=a,region=".to_vec());
    }

    #[test]
    fn test_make_tags_key_empty_dims() {
        let tags = Tags::from_pairs([("host", "a")]);
        assert!(make_tags_key(&[], &tags).is_empty());
    }
}
