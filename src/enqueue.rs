//! The reader enqueuer: the producer half of a bootstrap run.
//!
//! Walks the requested ranges one block-sized time window at a time, opens
//! every fileset overlapping the window, and sends the grouped readers to
//! the worker pool over a rendezvous channel. The channel is capacity-1 so
//! the producer paces itself to consumer demand, bounding the number of
//! concurrently open filesets.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::fileset::{read_info_files, DataFileSetReader, FileSetId};
use crate::pool::ReaderPool;
use crate::ranges::{ShardTimeRanges, TimeRange, UnixNanos};
use crate::types::{NamespaceId, ShardId};

/// One unit of work for the worker pool: everything the run needs to
/// restore a single block-sized time window.
///
/// `ranges` is the full requested coverage for the window, including shards
/// for which no fileset could be opened; whatever the readers fail to
/// account for surfaces as unfulfilled.
#[derive(Debug)]
pub(crate) struct TimeWindowReaders {
    /// Requested coverage for this window, across all shards.
    pub(crate) ranges: ShardTimeRanges,
    /// Open readers grouped by shard, in ascending volume order.
    pub(crate) readers: BTreeMap<ShardId, Vec<Box<dyn DataFileSetReader>>>,
}

/// The ascending block starts needed to cover `ranges`.
pub(crate) fn block_starts(ranges: &ShardTimeRanges, block_size: Duration) -> BTreeSet<UnixNanos> {
    let mut starts = BTreeSet::new();
    for (_, shard_ranges) in ranges.iter() {
        for range in shard_ranges.iter() {
            let mut start = range.start.truncate(block_size);
            while start < range.end {
                starts.insert(start);
                start = start.add(block_size);
            }
        }
    }
    starts
}

/// Produce [`TimeWindowReaders`] for every window of `ranges`, in ascending
/// block-start order, until done or the consumer hangs up.
///
/// Filesets that fail to open are logged and dropped from their window; the
/// window is still sent so the missing coverage is accounted unfulfilled.
/// The channel closes when this task returns, signalling the consumer that
/// no more work will arrive.
pub(crate) async fn enqueue_readers(
    root: PathBuf,
    namespace: NamespaceId,
    block_size: Duration,
    ranges: ShardTimeRanges,
    pool: Arc<ReaderPool>,
    tx: mpsc::Sender<TimeWindowReaders>,
) {
    // Enumerate every fileset up front; windows then only open what exists.
    let mut volumes: BTreeMap<(ShardId, UnixNanos), Vec<u32>> = BTreeMap::new();
    let shards: Vec<_> = ranges.shards().collect();
    for shard in shards {
        for file in read_info_files(&root, &namespace, shard).await {
            match file.result {
                Ok(info) => volumes
                    .entry((shard, info.block_start()))
                    .or_default()
                    .push(info.volume_index),
                Err(error) => warn!(
                    %namespace,
                    shard,
                    path = %file.path.display(),
                    %error,
                    "skipping corrupt info file"
                ),
            }
        }
    }
    for vols in volumes.values_mut() {
        vols.sort_unstable();
        vols.dedup();
    }

    for block_start in block_starts(&ranges, block_size) {
        let window = TimeRange::new(block_start, block_start.add(block_size));
        let mut window_ranges = ShardTimeRanges::new();
        let mut readers: BTreeMap<ShardId, Vec<Box<dyn DataFileSetReader>>> = BTreeMap::new();

        for (shard, shard_ranges) in ranges.iter() {
            let overlap = shard_ranges.intersect(&window);
            if overlap.is_empty() {
                continue;
            }
            window_ranges.set(shard, overlap);

            // An index-run window may span several data blocks; open every
            // fileset whose block start falls inside it.
            let mut shard_readers = Vec::new();
            for (&(_, fileset_start), vols) in
                volumes.range((shard, window.start)..(shard, window.end))
            {
                for &volume in vols {
                    let mut reader = pool.get();
                    let id = FileSetId {
                        namespace: namespace.clone(),
                        shard,
                        block_start: fileset_start,
                        volume,
                    };
                    match reader.open(id).await {
                        Ok(()) => shard_readers.push(reader),
                        Err(error) => {
                            warn!(
                                %namespace,
                                shard,
                                block_start = %fileset_start,
                                volume,
                                %error,
                                "unable to open fileset reader"
                            );
                            // The reader holds no open state after a failed
                            // open.
                            pool.put(reader);
                        }
                    }
                }
            }
            if !shard_readers.is_empty() {
                readers.insert(shard, shard_readers);
            }
        }

        if window_ranges.is_empty() {
            continue;
        }
        let work = TimeWindowReaders {
            ranges: window_ranges,
            readers,
        };
        if tx.send(work).await.is_err() {
            debug!(%namespace, "bootstrap consumer hung up, stopping reader enqueue");
            return;
        }
    }
}
