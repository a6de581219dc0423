//! The seam between the bootstrap engine and the database's in-memory series
//! set.
//!
//! The engine never constructs series state itself; it checks series out of a
//! caller-provided [`DataAccumulator`] and loads blocks into them. The
//! accumulator provides its own serialization (typically a per-shard or
//! per-series lock), so workers may check out series concurrently.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::ranges::UnixNanos;
use crate::types::{SeriesId, ShardId, Tags};

/// Errors surfaced by an accumulator. Both variants abort the current
/// reader's loop and leave its range unfulfilled.
#[derive(Debug, Error)]
pub enum AccumulatorError {
    /// The series could not be checked out of the accumulator.
    #[error("series checkout failed: {0}")]
    Checkout(String),

    /// The series rejected the block load.
    #[error("block load failed: {0}")]
    LoadBlock(String),
}

/// A time-aligned block of compressed series data restored from a fileset.
#[derive(Debug, Clone)]
pub struct DataBlock {
    /// Start of the block's interval.
    pub start: UnixNanos,
    /// The span the block covers.
    pub block_size: Duration,
    /// The raw compressed payload, exactly as stored on disk.
    pub data: Bytes,
}

impl DataBlock {
    /// Assemble a block for loading.
    pub fn new(start: UnixNanos, block_size: Duration, data: Bytes) -> Self {
        Self {
            start,
            block_size,
            data,
        }
    }
}

/// Whether a loaded block remains appendable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    /// The block accepts further appends. Bootstrap always loads warm so
    /// writes arriving during the restore window land in the same block.
    Warm,
    /// The block is immutable once loaded.
    Cold,
}

/// A checked-out series, ready to receive restored blocks.
pub trait SeriesRef: Send + Sync + Debug {
    /// Load `block` into the series.
    fn load_block(&self, block: DataBlock, write_type: WriteType) -> Result<(), AccumulatorError>;
}

/// The database's in-memory series set, as seen by the bootstrap engine.
pub trait DataAccumulator: Send + Sync + Debug {
    /// Check out (creating if needed) the series `id` on `shard`, taking
    /// whatever internal lock the accumulator requires.
    fn checkout_series(
        &self,
        shard: ShardId,
        id: &SeriesId,
        tags: &Tags,
    ) -> Result<Arc<dyn SeriesRef>, AccumulatorError>;
}
