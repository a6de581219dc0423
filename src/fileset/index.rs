//! Index fileset reading and the persist-manager seam used to flush rebuilt
//! index segments back to durable storage.

use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use super::info::{crc32, read_info, write_info, INFO_FILE_NAME};
use super::{index_fileset_dir, FileSetError};
use crate::config::FileSetType;
use crate::index::{Document, Segment};
use crate::namespace::Namespace;
use crate::ranges::{duration_nanos, UnixNanos};
use crate::types::{NamespaceId, ShardId};

const SEGMENT_FILE_NAME: &str = "segment.json";

/// Errors flushing an index segment to durable storage.
#[derive(Debug, Error)]
pub enum PersistError {
    /// An I/O error writing the fileset.
    #[error("i/o: {0}")]
    Io(#[from] io::Error),

    /// The segment contents could not be serialized.
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The manager does not write filesets of the requested flavor.
    #[error("unsupported fileset type: {0:?}")]
    UnsupportedFileSetType(FileSetType),
}

/// Shared handle through which bootstrap workers flush rebuilt index
/// segments.
///
/// Implementations must serialize flushes of the same `(namespace,
/// block_start)` pair and publish atomically, so a crash mid-flush leaves
/// either the previous fileset or none, never a torn one. The operation is
/// idempotent at the fileset-identifier level.
#[async_trait]
pub trait IndexPersistManager: Send + Sync + Debug {
    /// Write `documents` as the index segment set for `(namespace,
    /// block_start)` covering `shards`, returning handles to the persisted
    /// segments.
    async fn persist_index_segments(
        &self,
        namespace: &Namespace,
        block_start: UnixNanos,
        shards: Vec<ShardId>,
        documents: Vec<Document>,
        fileset_type: FileSetType,
    ) -> Result<Vec<Segment>, PersistError>;
}

/// Read the persisted index segments for `(namespace, block_start, volume)`,
/// verifying the segment payload against the info file's digest.
pub(crate) async fn read_index_segments(
    root: &Path,
    namespace: &NamespaceId,
    block_start: UnixNanos,
    volume: u32,
) -> Result<Vec<Segment>, FileSetError> {
    let dir = index_fileset_dir(root, namespace, block_start, volume);
    let info = read_info(&dir.join(INFO_FILE_NAME)).await?;
    let bytes = fs::read(dir.join(SEGMENT_FILE_NAME)).await?;
    let computed = crc32(&bytes);
    if computed != info.data_checksum {
        return Err(FileSetError::DigestMismatch {
            expected: info.data_checksum,
            computed,
        });
    }
    let docs: Vec<Document> =
        serde_json::from_slice(&bytes).map_err(|e| FileSetError::CorruptSegment(e.to_string()))?;
    Ok(vec![Segment::new(docs)])
}

/// The filesystem-backed [`IndexPersistManager`].
///
/// Writes go to a `.tmp` sibling directory first and are published with a
/// single rename.
#[derive(Debug)]
pub struct FsIndexPersistManager {
    root: PathBuf,
    flush_locks: Mutex<HashMap<(NamespaceId, UnixNanos), Arc<tokio::sync::Mutex<()>>>>,
}

impl FsIndexPersistManager {
    /// A persist manager rooted at the fileset directory `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            flush_locks: Mutex::new(HashMap::new()),
        }
    }

    fn flush_lock(&self, namespace: &NamespaceId, block_start: UnixNanos) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.flush_locks
                .lock()
                .entry((namespace.clone(), block_start))
                .or_default(),
        )
    }
}

#[async_trait]
impl IndexPersistManager for FsIndexPersistManager {
    async fn persist_index_segments(
        &self,
        namespace: &Namespace,
        block_start: UnixNanos,
        shards: Vec<ShardId>,
        documents: Vec<Document>,
        fileset_type: FileSetType,
    ) -> Result<Vec<Segment>, PersistError> {
        if fileset_type != FileSetType::Flush {
            return Err(PersistError::UnsupportedFileSetType(fileset_type));
        }

        let lock = self.flush_lock(namespace.id(), block_start);
        let _guard = lock.lock().await;

        let payload = serde_json::to_vec(&documents)?;
        let info = super::Info {
            block_start_nanos: block_start.get(),
            block_size_nanos: duration_nanos(namespace.index().block_size),
            shards,
            volume_index: 0,
            entries: documents.len() as u64,
            data_checksum: crc32(&payload),
        };

        let dir = index_fileset_dir(&self.root, namespace.id(), block_start, 0);
        let tmp = dir.with_extension("tmp");
        remove_dir_if_present(&tmp).await?;
        fs::create_dir_all(&tmp).await?;
        fs::write(tmp.join(SEGMENT_FILE_NAME), &payload).await?;
        write_info(&tmp, &info).await?;

        remove_dir_if_present(&dir).await?;
        fs::rename(&tmp, &dir).await?;

        debug!(
            namespace = %namespace.id(),
            %block_start,
            entries = info.entries,
            "persisted bootstrapped index segment"
        );
        Ok(vec![Segment::new(documents)])
    }
}

async fn remove_dir_if_present(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
