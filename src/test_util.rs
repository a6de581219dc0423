//! Shared helpers for unit tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::accumulator::{AccumulatorError, DataAccumulator, DataBlock, SeriesRef, WriteType};
use crate::fileset::data::DATA_FILE_NAME;
use crate::fileset::{
    data_fileset_dir, write_data_fileset, DataFileSetReader, FileSetId, FsDataReader,
    ReaderAllocFn, SeriesEntry,
};
use crate::namespace::{IndexOptions, Namespace, RetentionOptions};
use crate::ranges::UnixNanos;
use crate::types::{SeriesId, ShardId, Tag, Tags};

pub(crate) const BLOCK_SIZE: Duration = Duration::from_secs(2 * 3_600);

pub(crate) fn hours(h: i64) -> UnixNanos {
    UnixNanos::new(h * 3_600 * 1_000_000_000)
}

pub(crate) fn test_namespace() -> Namespace {
    Namespace::new(
        "testns".into(),
        RetentionOptions {
            block_size: BLOCK_SIZE,
        },
        IndexOptions {
            enabled: true,
            block_size: BLOCK_SIZE,
        },
    )
}

pub(crate) fn fs_allocator(root: &Path) -> Arc<ReaderAllocFn> {
    let root = root.to_path_buf();
    Arc::new(move || Box::new(FsDataReader::new(root.clone())) as Box<dyn DataFileSetReader>)
}

pub(crate) fn series_entries(shard: ShardId, n: usize) -> Vec<SeriesEntry> {
    (0..n)
        .map(|i| {
            SeriesEntry::new(
                SeriesId::from(format!("series-{shard}-{i}").as_str()),
                Tags::new(vec![
                    Tag::new("city", "dublin"),
                    Tag::new("host", format!("host-{i}")),
                ]),
                vec![i as u8; 8],
            )
        })
        .collect()
}

pub(crate) async fn write_fileset(
    root: &Path,
    shard: ShardId,
    block_start: UnixNanos,
    entries: usize,
) -> Vec<SeriesEntry> {
    let id = FileSetId {
        namespace: test_namespace().id().clone(),
        shard,
        block_start,
        volume: 0,
    };
    let entries = series_entries(shard, entries);
    write_data_fileset(root, &id, BLOCK_SIZE, &entries)
        .await
        .unwrap();
    entries
}

pub(crate) async fn open_reader(
    root: &Path,
    shard: ShardId,
    block_start: UnixNanos,
) -> Box<dyn DataFileSetReader> {
    let mut reader: Box<dyn DataFileSetReader> = Box::new(FsDataReader::new(root));
    reader
        .open(FileSetId {
            namespace: test_namespace().id().clone(),
            shard,
            block_start,
            volume: 0,
        })
        .await
        .unwrap();
    reader
}

/// Flip a byte inside the first record of a written data fileset so reading
/// it fails its record checksum.
pub(crate) fn corrupt_fileset_payload(root: &Path, shard: ShardId, block_start: UnixNanos) {
    let path = data_fileset_dir(root, test_namespace().id(), shard, block_start, 0)
        .join(DATA_FILE_NAME);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[12] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();
}

#[derive(Debug, Clone)]
pub(crate) struct LoadRecord {
    pub(crate) shard: ShardId,
    pub(crate) id: SeriesId,
    pub(crate) tags: Tags,
    pub(crate) block_start: UnixNanos,
    pub(crate) write_type: WriteType,
}

/// A [`DataAccumulator`] that records every block load.
#[derive(Debug, Default)]
pub(crate) struct MockAccumulator {
    loads: Arc<Mutex<Vec<LoadRecord>>>,
}

impl MockAccumulator {
    pub(crate) fn loads(&self) -> Vec<LoadRecord> {
        self.loads.lock().clone()
    }
}

impl DataAccumulator for MockAccumulator {
    fn checkout_series(
        &self,
        shard: ShardId,
        id: &SeriesId,
        tags: &Tags,
    ) -> Result<Arc<dyn SeriesRef>, AccumulatorError> {
        Ok(Arc::new(MockSeriesRef {
            shard,
            id: id.clone(),
            tags: tags.clone(),
            loads: Arc::clone(&self.loads),
        }))
    }
}

#[derive(Debug)]
struct MockSeriesRef {
    shard: ShardId,
    id: SeriesId,
    tags: Tags,
    loads: Arc<Mutex<Vec<LoadRecord>>>,
}

impl SeriesRef for MockSeriesRef {
    fn load_block(&self, block: DataBlock, write_type: WriteType) -> Result<(), AccumulatorError> {
        self.loads.lock().push(LoadRecord {
            shard: self.shard,
            id: self.id.clone(),
            tags: self.tags.clone(),
            block_start: block.start,
            write_type,
        });
        Ok(())
    }
}
