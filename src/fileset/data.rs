//! Filesystem-backed data fileset reader and writer.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, BufReader};

use super::info::{crc32, read_info, write_info, INFO_FILE_NAME};
use super::{
    data_fileset_dir, DataFileSetReader, Entry, EntryMetadata, FileSetError, FileSetId, Info,
};
use crate::ranges::{duration_nanos, TimeRange};
use crate::types::{SeriesId, Tags};

pub(crate) const DATA_FILE_NAME: &str = "data.bin";
const RECORD_HEADER_LEN: usize = 12;

// Sanity bound on any single record field; a length beyond this is treated
// as corruption rather than attempted as an allocation.
const MAX_FIELD_LEN: usize = 1 << 26;

/// A [`DataFileSetReader`] over the on-disk layout described in
/// [`crate::fileset`].
///
/// The reader keeps a running CRC32 of every byte it consumes;
/// [`validate`](DataFileSetReader::validate) compares that digest against the
/// one recorded in the info file once all entries have been read.
pub struct FsDataReader {
    root: PathBuf,
    state: Option<OpenState>,
}

struct OpenState {
    id: FileSetId,
    info: Info,
    file: BufReader<File>,
    digest: crc32fast::Hasher,
    entries_read: u64,
}

impl FsDataReader {
    /// A closed reader rooted at the fileset directory `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: None,
        }
    }

    async fn next_record(&mut self) -> Result<(SeriesId, Tags, Bytes, u32), FileSetError> {
        let state = self.state.as_mut().ok_or(FileSetError::NotOpen)?;
        if state.entries_read >= state.info.entries {
            return Err(FileSetError::EntriesExhausted {
                entries: state.info.entries,
            });
        }
        let index = state.entries_read;

        let mut header = [0u8; RECORD_HEADER_LEN];
        state.file.read_exact(&mut header).await?;
        let id_len = LittleEndian::read_u32(&header[0..4]) as usize;
        let tags_len = LittleEndian::read_u32(&header[4..8]) as usize;
        let data_len = LittleEndian::read_u32(&header[8..12]) as usize;
        for len in [id_len, tags_len, data_len] {
            if len > MAX_FIELD_LEN {
                return Err(FileSetError::MalformedRecord {
                    index,
                    reason: format!("field length {len} exceeds bound"),
                });
            }
        }

        let mut id = vec![0u8; id_len];
        state.file.read_exact(&mut id).await?;
        let mut tags_bytes = vec![0u8; tags_len];
        state.file.read_exact(&mut tags_bytes).await?;
        let mut data = vec![0u8; data_len];
        state.file.read_exact(&mut data).await?;
        let mut crc_bytes = [0u8; 4];
        state.file.read_exact(&mut crc_bytes).await?;
        let checksum = LittleEndian::read_u32(&crc_bytes);

        let mut record_crc = crc32fast::Hasher::new();
        record_crc.update(&id);
        record_crc.update(&tags_bytes);
        record_crc.update(&data);
        if record_crc.finalize() != checksum {
            return Err(FileSetError::RecordChecksum { index });
        }

        state.digest.update(&header);
        state.digest.update(&id);
        state.digest.update(&tags_bytes);
        state.digest.update(&data);
        state.digest.update(&crc_bytes);

        let tags: Tags = serde_json::from_slice(&tags_bytes).map_err(|e| {
            FileSetError::MalformedRecord {
                index,
                reason: e.to_string(),
            }
        })?;

        state.entries_read += 1;
        Ok((SeriesId::new(id), tags, Bytes::from(data), checksum))
    }

    fn check_digest(&self) -> Result<(), FileSetError> {
        let state = self.state.as_ref().ok_or(FileSetError::NotOpen)?;
        if state.entries_read != state.info.entries {
            return Err(FileSetError::IncompleteRead {
                read: state.entries_read,
                entries: state.info.entries,
            });
        }
        let computed = state.digest.clone().finalize();
        if computed != state.info.data_checksum {
            return Err(FileSetError::DigestMismatch {
                expected: state.info.data_checksum,
                computed,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for FsDataReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsDataReader")
            .field("root", &self.root)
            .field("open", &self.state.as_ref().map(|s| &s.id))
            .finish()
    }
}

#[async_trait::async_trait]
impl DataFileSetReader for FsDataReader {
    async fn open(&mut self, id: FileSetId) -> Result<(), FileSetError> {
        let dir = data_fileset_dir(&self.root, &id.namespace, id.shard, id.block_start, id.volume);
        let info = read_info(&dir.join(INFO_FILE_NAME)).await?;
        let file = File::open(dir.join(DATA_FILE_NAME)).await?;
        self.state = Some(OpenState {
            id,
            info,
            file: BufReader::new(file),
            digest: crc32fast::Hasher::new(),
            entries_read: 0,
        });
        Ok(())
    }

    fn range(&self) -> Option<TimeRange> {
        self.state.as_ref().map(|s| s.info.block_range())
    }

    fn entries(&self) -> u64 {
        self.state.as_ref().map(|s| s.info.entries).unwrap_or(0)
    }

    async fn read(&mut self) -> Result<Entry, FileSetError> {
        let (id, tags, data, checksum) = self.next_record().await?;
        Ok(Entry {
            id,
            tags,
            data,
            checksum,
        })
    }

    async fn read_metadata(&mut self) -> Result<EntryMetadata, FileSetError> {
        let (id, tags, _, checksum) = self.next_record().await?;
        Ok(EntryMetadata { id, tags, checksum })
    }

    async fn validate(&self) -> Result<(), FileSetError> {
        self.check_digest()
    }

    async fn validate_metadata(&self) -> Result<(), FileSetError> {
        // Metadata reads consume whole records, so the single content digest
        // covers both read modes.
        self.check_digest()
    }

    async fn close(&mut self) -> Result<(), FileSetError> {
        self.state = None;
        Ok(())
    }
}

/// One series entry to be written to a data fileset. Checksums are computed
/// by the writer.
#[derive(Debug, Clone)]
pub struct SeriesEntry {
    /// The series identifier.
    pub id: SeriesId,
    /// The series' tag set.
    pub tags: Tags,
    /// The raw compressed block payload.
    pub data: Bytes,
}

impl SeriesEntry {
    /// Assemble an entry for writing.
    pub fn new(id: SeriesId, tags: Tags, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            tags,
            data: data.into(),
        }
    }
}

/// Write a complete data fileset (data file plus checksummed info file) for
/// `id`, returning the info record that was written.
pub async fn write_data_fileset(
    root: &std::path::Path,
    id: &FileSetId,
    block_size: Duration,
    entries: &[SeriesEntry],
) -> Result<Info, FileSetError> {
    let mut buf = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let tags_bytes =
            serde_json::to_vec(&entry.tags).map_err(|e| FileSetError::MalformedRecord {
                index: index as u64,
                reason: e.to_string(),
            })?;

        let mut header = [0u8; RECORD_HEADER_LEN];
        LittleEndian::write_u32(&mut header[0..4], entry.id.as_bytes().len() as u32);
        LittleEndian::write_u32(&mut header[4..8], tags_bytes.len() as u32);
        LittleEndian::write_u32(&mut header[8..12], entry.data.len() as u32);

        let mut record_crc = crc32fast::Hasher::new();
        record_crc.update(entry.id.as_bytes());
        record_crc.update(&tags_bytes);
        record_crc.update(&entry.data);
        let mut crc_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut crc_bytes, record_crc.finalize());

        buf.extend_from_slice(&header);
        buf.extend_from_slice(entry.id.as_bytes());
        buf.extend_from_slice(&tags_bytes);
        buf.extend_from_slice(&entry.data);
        buf.extend_from_slice(&crc_bytes);
    }

    let info = Info {
        block_start_nanos: id.block_start.get(),
        block_size_nanos: duration_nanos(block_size),
        shards: vec![id.shard],
        volume_index: id.volume,
        entries: entries.len() as u64,
        data_checksum: crc32(&buf),
    };

    let dir = data_fileset_dir(root, &id.namespace, id.shard, id.block_start, id.volume);
    fs::create_dir_all(&dir).await?;
    fs::write(dir.join(DATA_FILE_NAME), &buf).await?;
    write_info(&dir, &info).await?;
    Ok(info)
}
