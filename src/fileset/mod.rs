//! Durable fileset access: info files, data fileset readers, and index
//! fileset persistence.
//!
//! ## On-disk layout
//!
//! ```text
//! <root>/data/<namespace>/<shard>/<block_start_nanos>-<volume>/info.json
//!                                                             /data.bin
//! <root>/index/<namespace>/<block_start_nanos>-<volume>/info.json
//!                                                       /segment.json
//! ```
//!
//! `info.json` is a checksummed metadata record ([`Info`]); `data.bin` holds
//! length-prefixed `{id, tags, payload}` records, each carrying a CRC32, with
//! a whole-file digest recorded in the info file. The reader seam is the
//! [`DataFileSetReader`] trait so tests (and other storage backends) can
//! substitute their own implementations.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::ranges::{TimeRange, UnixNanos};
use crate::types::{NamespaceId, SeriesId, ShardId, Tags};

pub mod data;
pub mod index;
pub mod info;

pub use data::{write_data_fileset, FsDataReader, SeriesEntry};
pub use index::{FsIndexPersistManager, IndexPersistManager, PersistError};
pub use info::{read_index_info_files, read_info_files, Info, InfoFileResult};

/// Errors reading or validating a fileset.
#[derive(Debug, Error)]
pub enum FileSetError {
    /// An I/O error touching the fileset's files.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The info file could not be decoded or failed its checksum.
    #[error("corrupt info file: {0}")]
    CorruptInfo(String),

    /// A persisted index segment could not be decoded.
    #[error("corrupt index segment: {0}")]
    CorruptSegment(String),

    /// A data record's CRC did not match its contents.
    #[error("record {index} checksum mismatch")]
    RecordChecksum {
        /// Zero-based index of the offending record.
        index: u64,
    },

    /// A data record could not be decoded.
    #[error("malformed record {index}: {reason}")]
    MalformedRecord {
        /// Zero-based index of the offending record.
        index: u64,
        /// Decode failure detail.
        reason: String,
    },

    /// The whole-file digest did not match the info file.
    #[error("fileset digest mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    DigestMismatch {
        /// Digest recorded in the info file.
        expected: u32,
        /// Digest computed over the bytes actually read.
        computed: u32,
    },

    /// Validation was requested before every entry had been read.
    #[error("fileset not fully read: {read} of {entries} entries")]
    IncompleteRead {
        /// Entries read so far.
        read: u64,
        /// Entries the info file promises.
        entries: u64,
    },

    /// A read was attempted past the final entry.
    #[error("read past the final entry ({entries})")]
    EntriesExhausted {
        /// Entries the info file promises.
        entries: u64,
    },

    /// The reader has no open fileset.
    #[error("reader is not open")]
    NotOpen,
}

/// Identifies one data fileset on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileSetId {
    /// Owning namespace.
    pub namespace: NamespaceId,
    /// Owning shard.
    pub shard: ShardId,
    /// Start of the block the fileset covers.
    pub block_start: UnixNanos,
    /// Volume index; multiple volumes may exist per (shard, block start).
    pub volume: u32,
}

/// One series entry read from a data fileset.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The series identifier.
    pub id: SeriesId,
    /// The series' tag set.
    pub tags: Tags,
    /// The raw compressed block payload.
    pub data: Bytes,
    /// CRC32 of the record contents, as stored on disk.
    pub checksum: u32,
}

/// The metadata-only projection of an [`Entry`], used by index runs.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    /// The series identifier.
    pub id: SeriesId,
    /// The series' tag set.
    pub tags: Tags,
    /// CRC32 of the record contents, as stored on disk.
    pub checksum: u32,
}

/// A streaming reader over one data fileset.
///
/// Readers iterate entries in fileset order and are reusable: after a
/// successful [`close`](Self::close) the same reader may be
/// [`open`](Self::open)ed against a different fileset, which is how the
/// bootstrap reader pool recycles them.
#[async_trait]
pub trait DataFileSetReader: Send + Debug {
    /// Open the fileset identified by `id`, replacing any previously open
    /// state.
    async fn open(&mut self, id: FileSetId) -> Result<(), FileSetError>;

    /// The block interval covered by the open fileset, or `None` if the
    /// reader is closed.
    fn range(&self) -> Option<TimeRange>;

    /// The number of entries in the open fileset (0 when closed).
    fn entries(&self) -> u64;

    /// Read the next entry in full.
    async fn read(&mut self) -> Result<Entry, FileSetError>;

    /// Read the next entry's identifier and tags, discarding its payload.
    async fn read_metadata(&mut self) -> Result<EntryMetadata, FileSetError>;

    /// Verify the fileset's content digest. Only meaningful once every entry
    /// has been read.
    async fn validate(&self) -> Result<(), FileSetError>;

    /// Verify the fileset's metadata digest. Only meaningful once every
    /// entry's metadata has been read.
    async fn validate_metadata(&self) -> Result<(), FileSetError>;

    /// Release the open fileset. A reader whose close fails must not be
    /// reused.
    async fn close(&mut self) -> Result<(), FileSetError>;
}

/// Factory used by the reader pool when it has no idle reader to hand out.
pub type ReaderAllocFn = dyn Fn() -> Box<dyn DataFileSetReader> + Send + Sync;

pub(crate) fn data_shard_dir(root: &Path, namespace: &NamespaceId, shard: ShardId) -> PathBuf {
    root.join("data").join(namespace.as_str()).join(shard.to_string())
}

pub(crate) fn data_fileset_dir(
    root: &Path,
    namespace: &NamespaceId,
    shard: ShardId,
    block_start: UnixNanos,
    volume: u32,
) -> PathBuf {
    data_shard_dir(root, namespace, shard).join(format!("{}-{}", block_start.get(), volume))
}

pub(crate) fn index_namespace_dir(root: &Path, namespace: &NamespaceId) -> PathBuf {
    root.join("index").join(namespace.as_str())
}

pub(crate) fn index_fileset_dir(
    root: &Path,
    namespace: &NamespaceId,
    block_start: UnixNanos,
    volume: u32,
) -> PathBuf {
    index_namespace_dir(root, namespace).join(format!("{}-{}", block_start.get(), volume))
}
