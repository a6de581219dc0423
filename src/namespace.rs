//! Namespace metadata consumed by the bootstrap engine.

use std::time::Duration;

use crate::types::NamespaceId;

/// Retention parameters of a namespace's data filesets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionOptions {
    /// The time span covered by one data block.
    pub block_size: Duration,
}

/// Inverted-index parameters of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    /// Whether the namespace maintains an inverted index at all. Namespaces
    /// with indexing disabled get a data bootstrap only.
    pub enabled: bool,
    /// The time span covered by one index block. May be a multiple of the
    /// data block size.
    pub block_size: Duration,
}

/// The subset of namespace metadata the bootstrap engine needs: identity,
/// data block sizing, and index configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    id: NamespaceId,
    retention: RetentionOptions,
    index: IndexOptions,
}

impl Namespace {
    /// Assemble namespace metadata.
    pub fn new(id: NamespaceId, retention: RetentionOptions, index: IndexOptions) -> Self {
        Self {
            id,
            retention,
            index,
        }
    }

    /// The namespace's identity.
    pub fn id(&self) -> &NamespaceId {
        &self.id
    }

    /// Retention options, including the data block size.
    pub fn retention(&self) -> &RetentionOptions {
        &self.retention
    }

    /// Index options, including whether indexing is enabled.
    pub fn index(&self) -> &IndexOptions {
        &self.index
    }
}
