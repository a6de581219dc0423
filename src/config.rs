//! Engine and per-run configuration.

use std::num::NonZeroUsize;

/// How the series cache retains data blocks.
///
/// Only [`CachePolicy::CacheAll`] requires the bootstrap to hydrate every
/// block eagerly; under any other policy blocks are faulted in on demand, so
/// a data bootstrap reports availability without opening data files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Every block is kept in memory; bootstrap loads all of them.
    CacheAll,
    /// Blocks read recently are retained; bootstrap loads lazily.
    RecentlyRead,
    /// A fixed-size LRU of blocks is retained; bootstrap loads lazily.
    #[default]
    Lru,
    /// No block caching; bootstrap loads lazily.
    None,
}

/// The durable fileset flavor a persist writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileSetType {
    /// A regular flushed fileset, readable by subsequent bootstraps.
    #[default]
    Flush,
    /// A point-in-time snapshot fileset.
    Snapshot,
}

/// Controls whether a run may persist rebuilt index segments back to durable
/// storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistConfig {
    /// Whether persistence is allowed at all.
    pub enabled: bool,
    /// The fileset flavor to write. Bootstrap only persists
    /// [`FileSetType::Flush`] filesets.
    pub fileset_type: FileSetType,
}

/// Per-invocation options accompanying a namespace bootstrap request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Index segment persistence policy for this run.
    pub persist: PersistConfig,
}

impl RunOptions {
    /// `true` if this run should flush fulfilled index blocks to durable
    /// storage.
    pub(crate) fn should_persist(&self) -> bool {
        self.persist.enabled && self.persist.fileset_type == FileSetType::Flush
    }
}

/// Engine-level configuration, fixed for the lifetime of a
/// [`FilesystemBootstrapper`].
///
/// [`FilesystemBootstrapper`]: crate::FilesystemBootstrapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Worker tasks processing data-run time windows.
    pub data_workers: usize,
    /// Worker tasks processing index-run time windows. Independent of
    /// `data_workers` so a slow index rebuild cannot starve data throughput.
    pub index_workers: usize,
    /// Documents accumulated per worker before a batch is flushed into the
    /// block's documents builder.
    pub batch_capacity: usize,
    /// Idle fileset readers retained for reuse across windows.
    pub reader_pool_capacity: usize,
    /// The series cache policy the database runs with. Anything other than
    /// [`CachePolicy::CacheAll`] makes data runs availability-only.
    pub cache_policy: CachePolicy,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4)
            .div_euclid(2)
            .max(1);
        Self {
            data_workers: workers,
            index_workers: workers,
            batch_capacity: 256,
            reader_pool_capacity: 64,
            cache_policy: CachePolicy::default(),
        }
    }
}
