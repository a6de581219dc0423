//! The availability oracle: which requested ranges could durable storage
//! plausibly satisfy, judged from info files alone.

use std::path::Path;

use futures::future::join_all;
use tracing::warn;

use crate::fileset::read_info_files;
use crate::namespace::Namespace;
use crate::ranges::ShardTimeRanges;

/// For each requested shard, report the full block intervals whose info
/// files overlap the request.
///
/// Corrupt info files are logged and skipped; they reduce availability but
/// never fail the call. The oracle is read-only: no data files are opened
/// and nothing is locked.
pub(crate) async fn availability(
    root: &Path,
    namespace: &Namespace,
    requested: &ShardTimeRanges,
) -> ShardTimeRanges {
    let shards: Vec<_> = requested.shards().collect();
    let per_shard = join_all(
        shards
            .iter()
            .map(|&shard| read_info_files(root, namespace.id(), shard)),
    )
    .await;

    let mut available = ShardTimeRanges::new();
    for (&shard, files) in shards.iter().zip(per_shard) {
        let Some(shard_ranges) = requested.get(shard) else {
            continue;
        };
        for file in files {
            match file.result {
                Ok(info) => {
                    let block = info.block_range();
                    if shard_ranges.overlaps(&block) {
                        available.add_range(shard, block);
                    }
                }
                Err(error) => {
                    warn!(
                        namespace = %namespace.id(),
                        shard,
                        path = %file.path.display(),
                        %error,
                        "skipping corrupt info file"
                    );
                }
            }
        }
    }
    available
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::{write_data_fileset, FileSetId, SeriesEntry};
    use crate::ranges::{TimeRange, UnixNanos};
    use crate::test_util::{hours, test_namespace, BLOCK_SIZE};
    use crate::types::{SeriesId, Tags};

    async fn write_fileset(root: &Path, shard: u32, block_start: UnixNanos) {
        let id = FileSetId {
            namespace: test_namespace().id().clone(),
            shard,
            block_start,
            volume: 0,
        };
        let entries = vec![SeriesEntry::new(
            SeriesId::from("series"),
            Tags::default(),
            vec![1u8, 2, 3],
        )];
        write_data_fileset(root, &id, BLOCK_SIZE, &entries)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reports_full_blocks_overlapping_the_request() {
        let dir = tempfile::tempdir().unwrap();
        let ns = test_namespace();
        write_fileset(dir.path(), 0, hours(0)).await;
        write_fileset(dir.path(), 0, hours(2)).await;
        write_fileset(dir.path(), 0, hours(6)).await; // outside the request
        write_fileset(dir.path(), 1, hours(0)).await; // shard not requested

        // A sub-block request still yields the full overlapping block.
        let requested: ShardTimeRanges =
            [(0u32, TimeRange::new(hours(1), hours(4)))].into_iter().collect();
        let available = availability(dir.path(), &ns, &requested).await;

        let want: ShardTimeRanges =
            [(0u32, TimeRange::new(hours(0), hours(4)))].into_iter().collect();
        assert_eq!(available, want);
    }

    #[tokio::test]
    async fn corrupt_info_reduces_availability_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let ns = test_namespace();
        write_fileset(dir.path(), 0, hours(0)).await;
        write_fileset(dir.path(), 0, hours(2)).await;

        // Scribble over the second block's info file.
        let info_path = dir
            .path()
            .join("data")
            .join(ns.id().as_str())
            .join("0")
            .join(format!("{}-0", hours(2).get()))
            .join("info.json");
        std::fs::write(&info_path, b"not json").unwrap();

        let requested: ShardTimeRanges =
            [(0u32, TimeRange::new(hours(0), hours(4)))].into_iter().collect();
        let available = availability(dir.path(), &ns, &requested).await;

        let want: ShardTimeRanges =
            [(0u32, TimeRange::new(hours(0), hours(2)))].into_iter().collect();
        assert_eq!(available, want);
    }
}
