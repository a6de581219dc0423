//! Inverted-index document model and segment building.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{SeriesId, Tags};

pub mod builder;
pub(crate) mod persist;
pub(crate) mod persisted;

pub use builder::DocumentsBuilder;

/// One indexed field of a document; the direct image of a series tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// The field (tag) name.
    pub name: String,
    /// The field (tag) value.
    pub value: String,
}

/// An index document: the identifier and tag fields of one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// The series identifier the document resolves to.
    pub id: Vec<u8>,
    /// The indexed fields.
    pub fields: Vec<Field>,
}

impl Document {
    /// Build the document for a series.
    pub fn from_series(id: &SeriesId, tags: &Tags) -> Self {
        Self {
            id: id.as_bytes().to_vec(),
            fields: tags
                .iter()
                .map(|t| Field {
                    name: t.name.clone(),
                    value: t.value.clone(),
                })
                .collect(),
        }
    }
}

/// An immutable in-memory index segment: a sealed set of documents for one
/// index block, either rebuilt during bootstrap or read back from a
/// persisted index fileset.
#[derive(Debug, Clone)]
pub struct Segment {
    docs: Arc<Vec<Document>>,
}

impl Segment {
    /// Seal `docs` into a segment.
    pub fn new(docs: Vec<Document>) -> Self {
        Self {
            docs: Arc::new(docs),
        }
    }

    /// Number of documents in the segment.
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// The sealed documents.
    pub fn documents(&self) -> &[Document] {
        &self.docs
    }
}
