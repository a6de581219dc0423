//! The index persist sidecar: flushes a fully fulfilled, freshly rebuilt
//! index block to durable storage so the next bootstrap reads it back
//! instead of rebuilding.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::config::FileSetType;
use crate::fileset::{IndexPersistManager, PersistError};
use crate::metrics::BootstrapMetrics;
use crate::namespace::Namespace;
use crate::ranges::{ShardTimeRanges, UnixNanos};
use crate::result::SharedRunResult;

/// Failures flushing a bootstrapped index block. By the time the sidecar
/// runs every input has been verified, so the caller reports these as
/// invariant violations; they never fail the bootstrap.
#[derive(Debug, Error)]
pub(crate) enum IndexPersistError {
    /// The window claimed fulfillment but no block was ever built.
    #[error("no index block built for block start {0}")]
    MissingBlock(UnixNanos),

    /// The persist manager rejected the flush.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Flush the index block covering `requested` through the shared persist
/// manager and record the persisted segments on the run result.
///
/// Windows that did not fully fulfill their block, and blocks with no
/// documents, are skipped quietly: persisting a partial block would poison
/// the fast path of every subsequent bootstrap.
pub(crate) async fn persist_bootstrap_index_segment(
    namespace: &Namespace,
    requested: &ShardTimeRanges,
    run_result: &SharedRunResult,
    persist_manager: &Arc<dyn IndexPersistManager>,
    metrics: &BootstrapMetrics,
    fileset_type: FileSetType,
) -> Result<(), IndexPersistError> {
    let Some(envelope) = requested.minmax() else {
        return Ok(());
    };
    let block_start = envelope.start.truncate(namespace.index().block_size);

    let Some((documents, fulfilled)) = run_result.snapshot_index_block(block_start) else {
        return Err(IndexPersistError::MissingBlock(block_start));
    };
    if !fulfilled.covers(requested) {
        debug!(
            namespace = %namespace.id(),
            %block_start,
            "index block not fully fulfilled for this window, skipping persist"
        );
        return Ok(());
    }
    if documents.is_empty() {
        debug!(
            namespace = %namespace.id(),
            %block_start,
            "no documents built for index block, skipping persist"
        );
        return Ok(());
    }

    let shards: Vec<_> = requested.shards().collect();
    let segments = persist_manager
        .persist_index_segments(namespace, block_start, shards, documents, fileset_type)
        .await?;
    metrics.persist_index_blocks_write.inc();
    run_result.record_persisted_segments(block_start, segments);
    Ok(())
}
