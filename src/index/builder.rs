//! Append-only builder of an in-memory index segment.

use std::collections::HashSet;

use super::{Document, Segment};

/// Accumulates the documents of a single index block.
///
/// Inserts must be serialized by the caller (the bootstrap engine holds the
/// run result's write lock across them); distinct blocks' builders may be
/// written in parallel by different workers. A series appearing in several
/// data filesets of the same index block produces duplicate documents, which
/// the builder drops by identifier.
#[derive(Debug, Default)]
pub struct DocumentsBuilder {
    docs: Vec<Document>,
    seen: HashSet<Vec<u8>>,
}

impl DocumentsBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain `batch` into the builder, dropping documents whose series has
    /// already been inserted.
    pub fn insert_batch(&mut self, batch: &mut Vec<Document>) {
        for doc in batch.drain(..) {
            if self.seen.insert(doc.id.clone()) {
                self.docs.push(doc);
            }
        }
    }

    /// Number of distinct documents inserted so far.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// `true` if nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// The distinct documents inserted so far, in insertion order.
    pub fn documents(&self) -> &[Document] {
        &self.docs
    }

    /// Seal the current contents into an immutable [`Segment`].
    pub fn seal(&self) -> Segment {
        Segment::new(self.docs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SeriesId, Tags};

    fn doc(id: &str) -> Document {
        Document::from_series(&SeriesId::from(id), &Tags::default())
    }

    #[test]
    fn duplicate_series_are_dropped() {
        let mut builder = DocumentsBuilder::new();

        let mut batch = vec![doc("a"), doc("b"), doc("a")];
        builder.insert_batch(&mut batch);
        assert!(batch.is_empty(), "insert_batch drains the batch");
        assert_eq!(builder.len(), 2);

        // A later batch re-inserting an earlier series is also dropped.
        let mut batch = vec![doc("b"), doc("c")];
        builder.insert_batch(&mut batch);
        assert_eq!(builder.len(), 3);

        let sealed = builder.seal();
        let ids: Vec<_> = sealed
            .documents()
            .iter()
            .map(|d| String::from_utf8_lossy(&d.id).into_owned())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
