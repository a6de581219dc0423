//! The entry loader: per-window worker logic.
//!
//! For data runs, every entry of every reader in the window is hydrated
//! into the series set through the accumulator. For index runs, entry
//! metadata is batched into documents and handed to the block's documents
//! builder under the run result's write lock. Either way, the first error
//! aborts that reader and leaves its range unfulfilled; other readers in
//! the window are unaffected.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};

use crate::accumulator::{AccumulatorError, DataAccumulator, DataBlock, WriteType};
use crate::config::{BootstrapConfig, CachePolicy, RunOptions};
use crate::enqueue::TimeWindowReaders;
use crate::fileset::{DataFileSetReader, FileSetError, IndexPersistManager};
use crate::index::persist::persist_bootstrap_index_segment;
use crate::index::Document;
use crate::metrics::BootstrapMetrics;
use crate::namespace::{IndexOptions, Namespace};
use crate::pool::ReaderPool;
use crate::ranges::{ShardTimeRanges, TimeRange, UnixNanos};
use crate::result::{ResultError, SharedRunResult};
use crate::types::ShardId;

/// Which side of the bootstrap a run restores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunType {
    /// Hydrate series data blocks.
    Data,
    /// Rebuild (or read back) inverted-index segments.
    Index,
}

/// Everything a worker needs to process one window, shared across the
/// worker pool of a run.
#[derive(Debug)]
pub(crate) struct LoadContext {
    pub(crate) run: RunType,
    pub(crate) namespace: Namespace,
    pub(crate) run_options: RunOptions,
    pub(crate) cache_policy: CachePolicy,
    pub(crate) batch_capacity: usize,
    pub(crate) accumulator: Arc<dyn DataAccumulator>,
    pub(crate) persist_manager: Arc<dyn IndexPersistManager>,
    pub(crate) metrics: BootstrapMetrics,
}

impl LoadContext {
    pub(crate) fn new(
        run: RunType,
        namespace: Namespace,
        run_options: RunOptions,
        config: &BootstrapConfig,
        accumulator: Arc<dyn DataAccumulator>,
        persist_manager: Arc<dyn IndexPersistManager>,
        metrics: BootstrapMetrics,
    ) -> Self {
        Self {
            run,
            namespace,
            run_options,
            cache_policy: config.cache_policy,
            batch_capacity: config.batch_capacity.max(1),
            accumulator,
            persist_manager,
            metrics,
        }
    }
}

/// Errors local to a single reader's loop. Any of these aborts the reader
/// and leaves its time range unfulfilled; none of them fail the run.
#[derive(Debug, Error)]
enum ReadError {
    #[error("failed to read entry: {0}")]
    ReadEntry(#[source] FileSetError),

    #[error("failed to read entry metadata: {0}")]
    ReadMetadata(#[source] FileSetError),

    #[error("failed to checkout series: {0}")]
    Checkout(#[source] AccumulatorError),

    #[error("failed to load block: {0}")]
    LoadBlock(#[source] AccumulatorError),

    #[error("data validation failed: {0}")]
    Validation(#[source] FileSetError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to mark index block fulfilled: {0}")]
    MarkFulfilled(#[from] ResultError),
}

/// Process one time window: drive every reader, account fulfillment, hand a
/// fully fulfilled index window to the persist sidecar, and recycle the
/// readers.
pub(crate) async fn load_time_window(
    ctx: &LoadContext,
    run_result: &SharedRunResult,
    window: TimeWindowReaders,
    pool: &ReaderPool,
) {
    let TimeWindowReaders { ranges, readers } = window;
    let requested = ranges.clone();
    let mut remaining = ranges;
    let mut times_with_errors: Vec<UnixNanos> = Vec::new();

    for (shard, shard_readers) in readers {
        for mut reader in shard_readers {
            let Some(time_range) = reader.range() else {
                // Enqueue only hands out open readers; treat a closed one as
                // already accounted (its range stays in `remaining`).
                warn!(shard, "skipping fileset reader with no open fileset");
                continue;
            };

            let result = load_reader(ctx, run_result, shard, time_range, reader.as_mut()).await;

            let mut reader_ranges = ShardTimeRanges::new();
            reader_ranges.add_range(shard, time_range);
            match result {
                Ok(()) => remaining.subtract(&reader_ranges),
                Err(error) => {
                    warn!(
                        namespace = %ctx.namespace.id(),
                        shard,
                        range = ?time_range,
                        %error,
                        "error bootstrapping from fileset reader"
                    );
                    times_with_errors.push(time_range.start);
                }
            }

            match reader.close().await {
                Ok(()) => pool.put(reader),
                Err(error) => {
                    // Not returned to the pool; the handle is released on
                    // drop.
                    warn!(shard, %error, "failed to close fileset reader, dropping it");
                }
            }
        }
    }

    if ctx.run == RunType::Index && ctx.run_options.should_persist() && remaining.is_empty() {
        if let Err(error) = persist_bootstrap_index_segment(
            &ctx.namespace,
            &requested,
            run_result,
            &ctx.persist_manager,
            &ctx.metrics,
            ctx.run_options.persist.fileset_type,
        )
        .await
        {
            // All inputs were verified before the sidecar ran; a failure
            // here is unexpected but must not fail the bootstrap.
            error!(
                namespace = %ctx.namespace.id(),
                %error,
                "invariant violated: failed to persist bootstrapped index segment"
            );
        }
    }

    mark_errors_and_unfulfilled(ctx.run, run_result, requested, remaining, times_with_errors);
}

async fn load_reader(
    ctx: &LoadContext,
    run_result: &SharedRunResult,
    shard: ShardId,
    time_range: TimeRange,
    reader: &mut dyn DataFileSetReader,
) -> Result<(), ReadError> {
    let start = time_range.start;
    let index_options = *ctx.namespace.index();
    let mut batch: Vec<Document> = Vec::new();

    if ctx.run == RunType::Index {
        // The block's builder is created exactly once, on first use.
        run_result.ensure_documents_builder(start, &index_options);
    }

    let entries = reader.entries();
    for _ in 0..entries {
        match ctx.run {
            RunType::Data => read_next_entry_and_record_block(ctx, shard, start, reader).await?,
            RunType::Index => {
                read_next_entry_and_maybe_index(
                    ctx,
                    run_result,
                    start,
                    &index_options,
                    reader,
                    &mut batch,
                )
                .await?
            }
        }
    }

    if ctx.run == RunType::Index && !batch.is_empty() {
        run_result.flush_batch(start, &index_options, &mut batch);
    }

    match ctx.run {
        RunType::Data => reader.validate().await.map_err(ReadError::Validation)?,
        RunType::Index => reader
            .validate_metadata()
            .await
            .map_err(ReadError::Validation)?,
    }

    if ctx.run == RunType::Index {
        let mut fulfilled = ShardTimeRanges::new();
        fulfilled.add_range(shard, time_range);
        run_result.mark_index_fulfilled(start, &fulfilled, &index_options)?;
    }

    Ok(())
}

async fn read_next_entry_and_record_block(
    ctx: &LoadContext,
    shard: ShardId,
    start: UnixNanos,
    reader: &mut dyn DataFileSetReader,
) -> Result<(), ReadError> {
    if ctx.cache_policy != CachePolicy::CacheAll {
        // Data runs under any other policy take the availability-only path
        // and never open filesets; reaching this point is a config error.
        return Err(ReadError::InvalidConfig(format!(
            "series cache policy {:?} does not hydrate data blocks at bootstrap",
            ctx.cache_policy
        )));
    }

    let entry = reader.read().await.map_err(ReadError::ReadEntry)?;
    let series = ctx
        .accumulator
        .checkout_series(shard, &entry.id, &entry.tags)
        .map_err(ReadError::Checkout)?;
    let block = DataBlock::new(start, ctx.namespace.retention().block_size, entry.data);
    series
        .load_block(block, WriteType::Warm)
        .map_err(ReadError::LoadBlock)?;
    Ok(())
}

async fn read_next_entry_and_maybe_index(
    ctx: &LoadContext,
    run_result: &SharedRunResult,
    start: UnixNanos,
    index_options: &IndexOptions,
    reader: &mut dyn DataFileSetReader,
    batch: &mut Vec<Document>,
) -> Result<(), ReadError> {
    let entry = reader
        .read_metadata()
        .await
        .map_err(ReadError::ReadMetadata)?;
    batch.push(Document::from_series(&entry.id, &entry.tags));
    if batch.len() >= ctx.batch_capacity {
        run_result.flush_batch(start, index_options, batch);
    }
    Ok(())
}

fn mark_errors_and_unfulfilled(
    run: RunType,
    run_result: &SharedRunResult,
    requested: ShardTimeRanges,
    remaining: ShardTimeRanges,
    times_with_errors: Vec<UnixNanos>,
) {
    if !times_with_errors.is_empty() {
        warn!(?times_with_errors, "encountered errors for time ranges");
    }

    let mut fulfilled = requested;
    fulfilled.subtract(&remaining);
    if run == RunType::Data {
        run_result.add_data_fulfilled(&fulfilled);
    }

    if !remaining.is_empty() {
        // Deliberately conservative: an error during either run type marks
        // the window's remainder unfulfilled on both halves, because partial
        // success within a window is not safely composable downstream.
        run_result.add_unfulfilled(&remaining);
    }
}

#[cfg(test)]
mod tests {
    use prometheus::Registry;

    use super::*;
    use crate::config::PersistConfig;
    use crate::fileset::FsIndexPersistManager;
    use crate::test_util::{
        fs_allocator, hours, open_reader, test_namespace, write_fileset, MockAccumulator,
    };

    fn context(run: RunType, accumulator: Arc<MockAccumulator>, root: &std::path::Path) -> LoadContext {
        let config = BootstrapConfig {
            cache_policy: CachePolicy::CacheAll,
            batch_capacity: 2,
            ..Default::default()
        };
        LoadContext::new(
            run,
            test_namespace(),
            RunOptions::default(),
            &config,
            accumulator,
            Arc::new(FsIndexPersistManager::new(root)),
            BootstrapMetrics::new(&Registry::new()),
        )
    }

    fn window_for(
        ranges: ShardTimeRanges,
        readers: Vec<(ShardId, Box<dyn DataFileSetReader>)>,
    ) -> TimeWindowReaders {
        let mut by_shard: std::collections::BTreeMap<_, Vec<_>> = Default::default();
        for (shard, reader) in readers {
            by_shard.entry(shard).or_default().push(reader);
        }
        TimeWindowReaders {
            ranges,
            readers: by_shard,
        }
    }

    #[tokio::test]
    async fn data_window_loads_every_entry_and_fulfills() {
        let dir = tempfile::tempdir().unwrap();
        write_fileset(dir.path(), 0, hours(0), 10).await;

        let accumulator = Arc::new(MockAccumulator::default());
        let ctx = context(RunType::Data, Arc::clone(&accumulator), dir.path());
        let run_result = SharedRunResult::default();
        let pool = ReaderPool::new(4, fs_allocator(dir.path()));

        let ranges: ShardTimeRanges =
            [(0u32, TimeRange::new(hours(0), hours(2)))].into_iter().collect();
        let reader = open_reader(dir.path(), 0, hours(0)).await;
        let window = window_for(ranges.clone(), vec![(0, reader)]);

        load_time_window(&ctx, &run_result, window, &pool).await;

        let loads = accumulator.loads();
        assert_eq!(loads.len(), 10);
        for load in &loads {
            assert_eq!(load.shard, 0);
            assert_eq!(load.block_start, hours(0));
            assert_eq!(load.write_type, WriteType::Warm);
            assert!(!load.id.as_bytes().is_empty());
            assert!(!load.tags.is_empty());
        }
        let result = run_result.take();
        assert_eq!(result.data.fulfilled(), &ranges);
        assert!(result.data.unfulfilled().is_empty());
        assert_eq!(pool.idle(), 1, "cleanly closed reader returned to pool");
    }

    #[tokio::test]
    async fn wrong_cache_policy_leaves_window_unfulfilled_on_both_halves() {
        let dir = tempfile::tempdir().unwrap();
        write_fileset(dir.path(), 0, hours(0), 3).await;

        let accumulator = Arc::new(MockAccumulator::default());
        let mut ctx = context(RunType::Data, Arc::clone(&accumulator), dir.path());
        ctx.cache_policy = CachePolicy::RecentlyRead;
        let run_result = SharedRunResult::default();
        let pool = ReaderPool::new(4, fs_allocator(dir.path()));

        let ranges: ShardTimeRanges =
            [(0u32, TimeRange::new(hours(0), hours(2)))].into_iter().collect();
        let reader = open_reader(dir.path(), 0, hours(0)).await;
        load_time_window(&ctx, &run_result, window_for(ranges.clone(), vec![(0, reader)]), &pool)
            .await;

        assert!(accumulator.loads().is_empty());
        let result = run_result.take();
        assert_eq!(result.data.unfulfilled(), &ranges);
        assert_eq!(result.index.unfulfilled(), &ranges);
    }

    #[tokio::test]
    async fn index_window_builds_documents_and_persists_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        write_fileset(dir.path(), 0, hours(0), 5).await;

        let accumulator = Arc::new(MockAccumulator::default());
        let mut ctx = context(RunType::Index, accumulator, dir.path());
        ctx.run_options = RunOptions {
            persist: PersistConfig {
                enabled: true,
                fileset_type: Default::default(),
            },
        };
        let run_result = SharedRunResult::default();
        let pool = ReaderPool::new(4, fs_allocator(dir.path()));

        let ranges: ShardTimeRanges =
            [(0u32, TimeRange::new(hours(0), hours(2)))].into_iter().collect();
        let reader = open_reader(dir.path(), 0, hours(0)).await;
        load_time_window(&ctx, &run_result, window_for(ranges.clone(), vec![(0, reader)]), &pool)
            .await;

        assert_eq!(ctx.metrics.persist_index_blocks_write.get(), 1);
        let result = run_result.take();
        assert_eq!(result.index.fulfilled(), &ranges);
        assert!(result.index.unfulfilled().is_empty());

        let block = result.index.block(hours(0)).expect("index block");
        assert!(block.is_persisted());
        assert_eq!(block.builder().len(), 5);
        assert_eq!(block.segments().len(), 1);
        assert_eq!(block.segments()[0].doc_count(), 5);
    }

    #[tokio::test]
    async fn one_failing_reader_does_not_poison_the_window() {
        let dir = tempfile::tempdir().unwrap();
        write_fileset(dir.path(), 0, hours(0), 4).await;
        write_fileset(dir.path(), 1, hours(0), 4).await;
        crate::test_util::corrupt_fileset_payload(dir.path(), 1, hours(0));

        let accumulator = Arc::new(MockAccumulator::default());
        let ctx = context(RunType::Data, Arc::clone(&accumulator), dir.path());
        let run_result = SharedRunResult::default();
        let pool = ReaderPool::new(4, fs_allocator(dir.path()));

        let ranges: ShardTimeRanges = [
            (0u32, TimeRange::new(hours(0), hours(2))),
            (1u32, TimeRange::new(hours(0), hours(2))),
        ]
        .into_iter()
        .collect();
        let reader_ok = open_reader(dir.path(), 0, hours(0)).await;
        let reader_bad = open_reader(dir.path(), 1, hours(0)).await;
        load_time_window(
            &ctx,
            &run_result,
            window_for(ranges, vec![(0, reader_ok), (1, reader_bad)]),
            &pool,
        )
        .await;

        let result = run_result.take();
        let want_ok: ShardTimeRanges =
            [(0u32, TimeRange::new(hours(0), hours(2)))].into_iter().collect();
        let want_bad: ShardTimeRanges =
            [(1u32, TimeRange::new(hours(0), hours(2)))].into_iter().collect();
        assert_eq!(result.data.fulfilled(), &want_ok);
        assert_eq!(result.data.unfulfilled(), &want_bad);
        assert_eq!(result.index.unfulfilled(), &want_bad);
    }
}
