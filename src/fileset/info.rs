//! Checksummed per-fileset metadata records.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use super::{data_shard_dir, index_namespace_dir, FileSetError};
use crate::ranges::{TimeRange, UnixNanos};
use crate::types::{NamespaceId, ShardId};

pub(crate) const INFO_FILE_NAME: &str = "info.json";

/// Durable metadata describing one fileset.
///
/// Data filesets record the single shard they belong to; index filesets
/// record every shard whose series contributed to the segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    /// Start of the block interval, nanoseconds since the epoch.
    pub block_start_nanos: i64,
    /// Length of the block interval in nanoseconds.
    pub block_size_nanos: i64,
    /// The shards covered by the fileset.
    pub shards: Vec<ShardId>,
    /// Volume index of the fileset.
    pub volume_index: u32,
    /// Number of entries (series records or index documents) in the fileset.
    pub entries: u64,
    /// CRC32 digest of the fileset's payload file.
    pub data_checksum: u32,
}

impl Info {
    /// Start of the block interval.
    pub fn block_start(&self) -> UnixNanos {
        UnixNanos::new(self.block_start_nanos)
    }

    /// The full block interval the fileset covers.
    pub fn block_range(&self) -> TimeRange {
        TimeRange::new(
            self.block_start(),
            UnixNanos::new(self.block_start_nanos + self.block_size_nanos),
        )
    }
}

/// The decode outcome for a single info file. Corrupt files are surfaced
/// per-entry so callers can skip them without losing the rest.
#[derive(Debug)]
pub struct InfoFileResult {
    /// Path of the info file that was read.
    pub path: PathBuf,
    /// The decoded info, or why decoding failed.
    pub result: Result<Info, FileSetError>,
}

/// `info.json` wraps the metadata with a CRC32 of its serialized form so a
/// torn write is detected as corruption rather than read as truth.
#[derive(Debug, Serialize, Deserialize)]
struct InfoEnvelope {
    checksum: u32,
    info: Info,
}

pub(crate) fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

pub(crate) async fn read_info(path: &Path) -> Result<Info, FileSetError> {
    let bytes = fs::read(path).await?;
    let envelope: InfoEnvelope = serde_json::from_slice(&bytes)
        .map_err(|e| FileSetError::CorruptInfo(e.to_string()))?;
    let payload = serde_json::to_vec(&envelope.info)
        .map_err(|e| FileSetError::CorruptInfo(e.to_string()))?;
    let computed = crc32(&payload);
    if computed != envelope.checksum {
        return Err(FileSetError::CorruptInfo(format!(
            "checksum mismatch: recorded {:#010x}, computed {computed:#010x}",
            envelope.checksum
        )));
    }
    Ok(envelope.info)
}

pub(crate) async fn write_info(dir: &Path, info: &Info) -> io::Result<()> {
    let payload = serde_json::to_vec(info).map_err(invalid_data)?;
    let envelope = InfoEnvelope {
        checksum: crc32(&payload),
        info: info.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&envelope).map_err(invalid_data)?;
    fs::write(dir.join(INFO_FILE_NAME), bytes).await
}

fn invalid_data(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Read every data fileset info file for `(namespace, shard)`.
///
/// A missing shard directory yields an empty list. Individual info files
/// that are missing or corrupt are reported as per-entry errors; they never
/// hide the remaining filesets.
pub async fn read_info_files(
    root: &Path,
    namespace: &NamespaceId,
    shard: ShardId,
) -> Vec<InfoFileResult> {
    read_info_dir(data_shard_dir(root, namespace, shard)).await
}

/// Read every index fileset info file for `namespace`.
pub async fn read_index_info_files(root: &Path, namespace: &NamespaceId) -> Vec<InfoFileResult> {
    read_info_dir(index_namespace_dir(root, namespace)).await
}

async fn read_info_dir(dir: PathBuf) -> Vec<InfoFileResult> {
    let mut results = Vec::new();
    let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return results,
        Err(e) => {
            results.push(InfoFileResult {
                path: dir,
                result: Err(e.into()),
            });
            return results;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if !is_dir {
            continue;
        }
        let path = entry.path().join(INFO_FILE_NAME);
        let result = read_info(&path).await;
        results.push(InfoFileResult { path, result });
    }

    // Deterministic (block start, volume) order for downstream grouping.
    results.sort_by_key(|r| match &r.result {
        Ok(info) => (info.block_start_nanos, info.volume_index, r.path.clone()),
        Err(_) => (i64::MAX, u32::MAX, r.path.clone()),
    });
    results
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ranges::duration_nanos;

    fn arbitrary_info(block_start_nanos: i64) -> Info {
        Info {
            block_start_nanos,
            block_size_nanos: duration_nanos(Duration::from_secs(7200)),
            shards: vec![0],
            volume_index: 0,
            entries: 3,
            data_checksum: 0xdead_beef,
        }
    }

    #[tokio::test]
    async fn info_survives_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let info = arbitrary_info(0);

        write_info(dir.path(), &info).await.unwrap();
        let read = read_info(&dir.path().join(INFO_FILE_NAME)).await.unwrap();
        assert_eq!(read, info);
    }

    #[tokio::test]
    async fn tampered_info_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        write_info(dir.path(), &arbitrary_info(0)).await.unwrap();

        let path = dir.path().join(INFO_FILE_NAME);
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, contents.replace("7200000000000", "3600000000000")).unwrap();

        let err = read_info(&path).await.unwrap_err();
        assert!(matches!(err, FileSetError::CorruptInfo(_)), "{err}");
    }

    #[tokio::test]
    async fn missing_shard_dir_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let results = read_info_files(dir.path(), &"ns".into(), 0).await;
        assert!(results.is_empty());
    }
}
