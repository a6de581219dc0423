//! Bootstrap result aggregates and the shared per-run accumulator.

use std::collections::{btree_map, BTreeMap};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::index::{Document, DocumentsBuilder, Segment};
use crate::namespace::IndexOptions;
use crate::ranges::{ShardTimeRanges, TimeRange, UnixNanos};
use crate::types::NamespaceId;

/// Errors recording results. These indicate a reader handed the aggregate
/// ranges outside its own block, and are treated like read errors.
#[derive(Debug, Error)]
pub enum ResultError {
    /// A fulfilled range fell outside the index block it was recorded for.
    #[error("range {range:?} outside index block {block:?}")]
    RangeOutsideBlock {
        /// The offending range.
        range: TimeRange,
        /// The index block's interval.
        block: TimeRange,
    },
}

/// The data half of a bootstrap run's outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBootstrapResult {
    fulfilled: ShardTimeRanges,
    unfulfilled: ShardTimeRanges,
}

impl DataBootstrapResult {
    /// A result with the given coverage split.
    pub fn new(fulfilled: ShardTimeRanges, unfulfilled: ShardTimeRanges) -> Self {
        Self {
            fulfilled,
            unfulfilled,
        }
    }

    /// Ranges restored into the series set (or available for lazy loading).
    pub fn fulfilled(&self) -> &ShardTimeRanges {
        &self.fulfilled
    }

    /// Ranges the bootstrap could not restore.
    pub fn unfulfilled(&self) -> &ShardTimeRanges {
        &self.unfulfilled
    }

    /// Replace the unfulfilled ranges.
    pub fn set_unfulfilled(&mut self, ranges: ShardTimeRanges) {
        self.unfulfilled = ranges;
    }

    pub(crate) fn add_fulfilled(&mut self, ranges: &ShardTimeRanges) {
        self.fulfilled.add_ranges(ranges);
    }

    pub(crate) fn add_unfulfilled(&mut self, ranges: &ShardTimeRanges) {
        self.unfulfilled.add_ranges(ranges);
    }
}

/// Merge two data results, unioning both sides.
pub fn merged_data_result(mut a: DataBootstrapResult, b: DataBootstrapResult) -> DataBootstrapResult {
    a.fulfilled.add_ranges(&b.fulfilled);
    a.unfulfilled.add_ranges(&b.unfulfilled);
    a
}

/// Per-index-block bootstrap state: the mutable documents builder, the
/// ranges proven fulfilled for the block, and any segments attached to it
/// (read back from disk, or recorded after a persist).
#[derive(Debug, Default)]
pub struct IndexBlock {
    builder: DocumentsBuilder,
    fulfilled: ShardTimeRanges,
    segments: Vec<Segment>,
    persisted: bool,
}

impl IndexBlock {
    /// Ranges proven fulfilled for this block.
    pub fn fulfilled(&self) -> &ShardTimeRanges {
        &self.fulfilled
    }

    /// The block's documents builder.
    pub fn builder(&self) -> &DocumentsBuilder {
        &self.builder
    }

    /// Segments attached to the block.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// `true` if the block's segments are durable on disk.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    fn merge(&mut self, other: Self) {
        self.fulfilled.add_ranges(&other.fulfilled);
        self.segments.extend(other.segments);
        self.persisted |= other.persisted;
        if self.builder.is_empty() && !other.builder.is_empty() {
            self.builder = other.builder;
        }
    }
}

/// The index half of a bootstrap run's outcome.
#[derive(Debug, Default)]
pub struct IndexBootstrapResult {
    blocks: BTreeMap<UnixNanos, IndexBlock>,
    fulfilled: ShardTimeRanges,
    unfulfilled: ShardTimeRanges,
}

impl IndexBootstrapResult {
    /// Iterate `(block_start, block)` pairs in ascending order.
    pub fn blocks(&self) -> impl Iterator<Item = (UnixNanos, &IndexBlock)> {
        self.blocks.iter().map(|(&start, block)| (start, block))
    }

    /// The block state for `block_start`, if any.
    pub fn block(&self, block_start: UnixNanos) -> Option<&IndexBlock> {
        self.blocks.get(&block_start)
    }

    /// Ranges whose index entries were restored or rebuilt.
    pub fn fulfilled(&self) -> &ShardTimeRanges {
        &self.fulfilled
    }

    /// Ranges the bootstrap could not index.
    pub fn unfulfilled(&self) -> &ShardTimeRanges {
        &self.unfulfilled
    }

    /// Replace the unfulfilled ranges.
    pub fn set_unfulfilled(&mut self, ranges: ShardTimeRanges) {
        self.unfulfilled = ranges;
    }

    pub(crate) fn add_unfulfilled(&mut self, ranges: &ShardTimeRanges) {
        self.unfulfilled.add_ranges(ranges);
    }

    /// The block for the index block containing `t`, created empty on first
    /// use. A block's builder is created here exactly once and never
    /// recreated.
    pub(crate) fn get_or_add_block(
        &mut self,
        t: UnixNanos,
        index_options: &IndexOptions,
    ) -> &mut IndexBlock {
        let block_start = t.truncate(index_options.block_size);
        self.blocks.entry(block_start).or_default()
    }

    /// Record that `ranges` within the index block containing `t` were
    /// fulfilled.
    pub(crate) fn mark_fulfilled(
        &mut self,
        t: UnixNanos,
        ranges: &ShardTimeRanges,
        index_options: &IndexOptions,
    ) -> Result<(), ResultError> {
        let block_start = t.truncate(index_options.block_size);
        let block_range = TimeRange::new(block_start, block_start.add(index_options.block_size));
        for (_, shard_ranges) in ranges.iter() {
            for range in shard_ranges.iter() {
                if !block_range.contains(range) {
                    return Err(ResultError::RangeOutsideBlock {
                        range: *range,
                        block: block_range,
                    });
                }
            }
        }

        let block = self.blocks.entry(block_start).or_default();
        block.fulfilled.add_ranges(ranges);
        self.fulfilled.add_ranges(ranges);
        Ok(())
    }

    /// Attach segments read back from a persisted index fileset.
    pub(crate) fn add_persisted_block(
        &mut self,
        block_start: UnixNanos,
        segments: Vec<Segment>,
        fulfilled: ShardTimeRanges,
    ) {
        let block = self.blocks.entry(block_start).or_default();
        block.segments.extend(segments);
        block.persisted = true;
        block.fulfilled.add_ranges(&fulfilled);
        self.fulfilled.add_ranges(&fulfilled);
    }
}

/// Merge two index results, unioning aggregates and folding `b`'s blocks
/// into `a`'s.
pub fn merged_index_result(
    mut a: IndexBootstrapResult,
    b: IndexBootstrapResult,
) -> IndexBootstrapResult {
    for (start, block) in b.blocks {
        match a.blocks.entry(start) {
            btree_map::Entry::Vacant(e) => {
                e.insert(block);
            }
            btree_map::Entry::Occupied(mut e) => e.get_mut().merge(block),
        }
    }
    a.fulfilled.add_ranges(&b.fulfilled);
    a.unfulfilled.add_ranges(&b.unfulfilled);
    a
}

/// The outcome of one `(namespace, run type)` bootstrap invocation.
///
/// A window that errors marks its remainder unfulfilled on **both** halves,
/// regardless of run type: partial success within a window is not safely
/// composable downstream, so the engine over-reports rather than under.
#[derive(Debug, Default)]
pub struct RunResult {
    /// The data half.
    pub data: DataBootstrapResult,
    /// The index half.
    pub index: IndexBootstrapResult,
}

/// A [`RunResult`] shared across the worker pool of one run, serialized by a
/// reader-writer lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedRunResult(Arc<RwLock<RunResult>>);

impl SharedRunResult {
    /// Take the accumulated result. Call only after every worker has
    /// finished.
    pub(crate) fn take(&self) -> RunResult {
        std::mem::take(&mut *self.0.write())
    }

    /// Mark `ranges` unfulfilled on both the data and index halves.
    pub(crate) fn add_unfulfilled(&self, ranges: &ShardTimeRanges) {
        let mut inner = self.0.write();
        inner.data.add_unfulfilled(ranges);
        inner.index.add_unfulfilled(ranges);
    }

    pub(crate) fn add_data_fulfilled(&self, ranges: &ShardTimeRanges) {
        self.0.write().data.add_fulfilled(ranges);
    }

    /// Create the documents builder for the index block containing `t` if it
    /// does not exist yet.
    pub(crate) fn ensure_documents_builder(&self, t: UnixNanos, index_options: &IndexOptions) {
        self.0.write().index.get_or_add_block(t, index_options);
    }

    /// Drain `batch` into the documents builder for the block containing
    /// `t`.
    pub(crate) fn flush_batch(
        &self,
        t: UnixNanos,
        index_options: &IndexOptions,
        batch: &mut Vec<Document>,
    ) {
        self.0
            .write()
            .index
            .get_or_add_block(t, index_options)
            .builder
            .insert_batch(batch);
    }

    pub(crate) fn mark_index_fulfilled(
        &self,
        t: UnixNanos,
        ranges: &ShardTimeRanges,
        index_options: &IndexOptions,
    ) -> Result<(), ResultError> {
        self.0.write().index.mark_fulfilled(t, ranges, index_options)
    }

    /// Snapshot the documents and fulfilled ranges of the block at
    /// `block_start`, if present.
    pub(crate) fn snapshot_index_block(
        &self,
        block_start: UnixNanos,
    ) -> Option<(Vec<Document>, ShardTimeRanges)> {
        let inner = self.0.read();
        inner
            .index
            .block(block_start)
            .map(|b| (b.builder.documents().to_vec(), b.fulfilled.clone()))
    }

    /// Replace the block's segments with their persisted form.
    pub(crate) fn record_persisted_segments(
        &self,
        block_start: UnixNanos,
        segments: Vec<Segment>,
    ) {
        let mut inner = self.0.write();
        let block = inner.index.blocks.entry(block_start).or_default();
        block.segments = segments;
        block.persisted = true;
    }
}

/// Per-namespace outcome of a full bootstrap.
#[derive(Debug)]
pub struct NamespaceResult {
    /// The namespace's data bootstrap outcome.
    pub data: DataBootstrapResult,
    /// The namespace's index bootstrap outcome, if indexing is enabled.
    pub index: Option<IndexBootstrapResult>,
}

/// The outcome of bootstrapping every requested namespace.
#[derive(Debug, Default)]
pub struct NamespaceResults(BTreeMap<NamespaceId, NamespaceResult>);

impl NamespaceResults {
    /// The outcome for `namespace`, if it was part of the request.
    pub fn get(&self, namespace: &NamespaceId) -> Option<&NamespaceResult> {
        self.0.get(namespace)
    }

    /// Iterate outcomes in namespace order.
    pub fn iter(&self) -> impl Iterator<Item = (&NamespaceId, &NamespaceResult)> {
        self.0.iter()
    }

    /// The number of namespaces bootstrapped.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if no namespaces were bootstrapped.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert_data(&mut self, namespace: NamespaceId, data: DataBootstrapResult) {
        self.0.insert(namespace, NamespaceResult { data, index: None });
    }

    pub(crate) fn set_index(&mut self, namespace: &NamespaceId, index: IndexBootstrapResult) {
        if let Some(result) = self.0.get_mut(namespace) {
            result.index = Some(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::index::Field;

    const HOUR: i64 = 3_600 * 1_000_000_000;

    fn idx_opts() -> IndexOptions {
        IndexOptions {
            enabled: true,
            block_size: Duration::from_secs(4 * 3_600),
        }
    }

    fn range(start_h: i64, end_h: i64) -> TimeRange {
        TimeRange::new(UnixNanos::new(start_h * HOUR), UnixNanos::new(end_h * HOUR))
    }

    #[test]
    fn mark_fulfilled_truncates_to_index_block() {
        let mut result = IndexBootstrapResult::default();
        let ranges: ShardTimeRanges = [(0u32, range(2, 4))].into_iter().collect();

        // A data-block start of 02:00 lands in the index block at 00:00.
        result
            .mark_fulfilled(UnixNanos::new(2 * HOUR), &ranges, &idx_opts())
            .unwrap();

        let block = result.block(UnixNanos::new(0)).expect("block created");
        assert_eq!(block.fulfilled(), &ranges);
        assert_eq!(result.fulfilled(), &ranges);
    }

    #[test]
    fn mark_fulfilled_rejects_ranges_outside_the_block() {
        let mut result = IndexBootstrapResult::default();
        let ranges: ShardTimeRanges = [(0u32, range(2, 6))].into_iter().collect();

        assert_matches!(
            result.mark_fulfilled(UnixNanos::new(2 * HOUR), &ranges, &idx_opts()),
            Err(ResultError::RangeOutsideBlock { .. })
        );
        assert!(result.fulfilled().is_empty());
    }

    #[test]
    fn shared_result_errors_mark_both_halves_unfulfilled() {
        let shared = SharedRunResult::default();
        let ranges: ShardTimeRanges = [(0u32, range(0, 2))].into_iter().collect();

        shared.add_unfulfilled(&ranges);

        let result = shared.take();
        assert_eq!(result.data.unfulfilled(), &ranges);
        assert_eq!(result.index.unfulfilled(), &ranges);
    }

    #[test]
    fn merged_index_result_folds_blocks() {
        let mut a = IndexBootstrapResult::default();
        let a_ranges: ShardTimeRanges = [(0u32, range(0, 2))].into_iter().collect();
        a.mark_fulfilled(UnixNanos::new(0), &a_ranges, &idx_opts())
            .unwrap();

        let mut b = IndexBootstrapResult::default();
        let b_ranges: ShardTimeRanges = [(1u32, range(0, 4))].into_iter().collect();
        b.add_persisted_block(
            UnixNanos::new(0),
            vec![Segment::new(vec![Document {
                id: b"a".to_vec(),
                fields: vec![Field {
                    name: "city".into(),
                    value: "lisbon".into(),
                }],
            }])],
            b_ranges.clone(),
        );

        let merged = merged_index_result(a, b);
        let block = merged.block(UnixNanos::new(0)).unwrap();
        assert!(block.is_persisted());
        assert_eq!(block.segments().len(), 1);

        let mut want = a_ranges;
        want.add_ranges(&b_ranges);
        assert_eq!(merged.fulfilled(), &want);
        assert_eq!(
            merged.block(UnixNanos::new(0)).unwrap().fulfilled(),
            &want
        );
    }
}
