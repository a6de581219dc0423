//! Core identifier types shared across the bootstrap engine.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifies one shard of a namespace.
pub type ShardId = u32;

/// Identifies a namespace. Doubles as the namespace's directory name in the
/// on-disk fileset layout.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespaceId(String);

impl NamespaceId {
    /// Construct a namespace ID from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The string form of this ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NamespaceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifies a single series within a shard.
///
/// Series IDs are opaque byte strings; they are usually UTF-8 but nothing in
/// the engine relies on it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesId(Bytes);

impl SeriesId {
    /// Construct a series ID from raw bytes.
    pub fn new(id: impl Into<Bytes>) -> Self {
        Self(id.into())
    }

    /// The raw bytes of this ID.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeriesId({})", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for SeriesId {
    fn from(id: &str) -> Self {
        Self::new(id.as_bytes().to_vec())
    }
}

/// A single name/value tag pair attached to a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// The tag name.
    pub name: String,
    /// The tag value.
    pub value: String,
}

impl Tag {
    /// Construct a tag from a name/value pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The ordered tag set of a series.
///
/// Ownership of a `Tags` value stands in for the "finalize exactly once"
/// contract of pooled tag iterators in other implementations of this engine:
/// dropping the value releases it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags(Vec<Tag>);

impl Tags {
    /// Construct a tag set from the given pairs.
    pub fn new(tags: Vec<Tag>) -> Self {
        Self(tags)
    }

    /// Iterate the tags in order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    /// The number of tags in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if the series carries no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Tags {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| Tag::new(name, value))
                .collect(),
        )
    }
}
