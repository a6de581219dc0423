//! The persisted-index fast path: before rebuilding index segments from
//! data filesets, read back whatever previous runs already persisted and
//! subtract it from the work plan.

use std::path::Path;

use tracing::warn;

use crate::fileset::index::read_index_segments;
use crate::fileset::read_index_info_files;
use crate::metrics::BootstrapMetrics;
use crate::namespace::Namespace;
use crate::ranges::{ShardTimeRanges, TimeRange};
use crate::result::IndexBootstrapResult;

/// Read every persisted index fileset overlapping `ranges`, returning the
/// coverage that no longer needs rebuilding together with the blocks read.
///
/// This path never fails a bootstrap: a corrupt info file or an unreadable
/// segment is a logged skip, leaving its ranges to the rebuild path.
pub(crate) async fn bootstrap_from_index_persisted_blocks(
    root: &Path,
    namespace: &Namespace,
    ranges: &ShardTimeRanges,
    metrics: &BootstrapMetrics,
) -> (ShardTimeRanges, IndexBootstrapResult) {
    let mut fulfilled = ShardTimeRanges::new();
    let mut result = IndexBootstrapResult::default();
    let index_block_size = namespace.index().block_size;

    for file in read_index_info_files(root, namespace.id()).await {
        let info = match file.result {
            Ok(info) => info,
            Err(error) => {
                warn!(
                    namespace = %namespace.id(),
                    path = %file.path.display(),
                    %error,
                    "skipping corrupt index info file"
                );
                continue;
            }
        };

        let block_start = info.block_start();
        let block_range = TimeRange::new(block_start, block_start.add(index_block_size));

        let mut will_fulfill = ShardTimeRanges::new();
        for &shard in &info.shards {
            let Some(shard_ranges) = ranges.get(shard) else {
                continue;
            };
            let overlap = shard_ranges.intersect(&block_range);
            if !overlap.is_empty() {
                will_fulfill.set(shard, overlap);
            }
        }
        if will_fulfill.is_empty() {
            continue;
        }

        match read_index_segments(root, namespace.id(), block_start, info.volume_index).await {
            Ok(segments) => {
                metrics.persist_index_blocks_read.inc();
                result.add_persisted_block(block_start, segments, will_fulfill.clone());
                fulfilled.add_ranges(&will_fulfill);
            }
            Err(error) => {
                warn!(
                    namespace = %namespace.id(),
                    %block_start,
                    volume = info.volume_index,
                    %error,
                    "unable to read persisted index segments, will rebuild from data filesets"
                );
            }
        }
    }

    (fulfilled, result)
}
