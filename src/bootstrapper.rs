//! The bootstrap driver: the crate's public API boundary.
//!
//! [`FilesystemBootstrapper::read`] sequences every namespace's data run
//! before any namespace's index run, so the two phases remain independently
//! observable. Each run spawns one producer task feeding a bounded worker
//! pool; partial failures surface as unfulfilled ranges, never as errors.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, info_span, Instrument};

use crate::accumulator::DataAccumulator;
use crate::availability::availability;
use crate::config::{BootstrapConfig, CachePolicy, RunOptions};
use crate::enqueue::enqueue_readers;
use crate::fileset::{
    DataFileSetReader, FsDataReader, FsIndexPersistManager, IndexPersistManager, ReaderAllocFn,
};
use crate::index::persisted::bootstrap_from_index_persisted_blocks;
use crate::loader::{load_time_window, LoadContext, RunType};
use crate::metrics::BootstrapMetrics;
use crate::namespace::Namespace;
use crate::pool::ReaderPool;
use crate::ranges::ShardTimeRanges;
use crate::result::{
    merged_index_result, DataBootstrapResult, NamespaceResults, RunResult, SharedRunResult,
};

/// Errors failing an entire bootstrap invocation.
///
/// Nearly everything the engine encounters — corrupt files, failed opens,
/// torn records — is accounted as unfulfilled coverage instead; only a
/// panicked or cancelled task surfaces here.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A producer or worker task aborted abnormally.
    #[error("bootstrap task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// One namespace's bootstrap request.
#[derive(Debug, Clone)]
pub struct NamespaceBootstrap {
    /// The namespace's metadata.
    pub namespace: Namespace,
    /// The (shard, time range) tuples to restore.
    pub ranges: ShardTimeRanges,
    /// The series set restored blocks are loaded into.
    pub accumulator: Arc<dyn DataAccumulator>,
    /// Options for this namespace's runs.
    pub run_options: RunOptions,
}

/// The namespaces of one bootstrap invocation, in bootstrap order.
#[derive(Debug, Clone, Default)]
pub struct Namespaces(Vec<NamespaceBootstrap>);

impl Namespaces {
    /// Wrap an ordered list of namespace requests.
    pub fn new(namespaces: Vec<NamespaceBootstrap>) -> Self {
        Self(namespaces)
    }

    /// Iterate requests in bootstrap order.
    pub fn iter(&self) -> impl Iterator<Item = &NamespaceBootstrap> {
        self.0.iter()
    }
}

impl FromIterator<NamespaceBootstrap> for Namespaces {
    fn from_iter<T: IntoIterator<Item = NamespaceBootstrap>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The filesystem bootstrap engine.
///
/// Holds the fileset root, the collaborator handles, and the per-engine
/// metrics; every [`read`](Self::read) call is an independent bootstrap.
pub struct FilesystemBootstrapper {
    config: BootstrapConfig,
    fileset_root: PathBuf,
    persist_manager: Arc<dyn IndexPersistManager>,
    reader_alloc: Arc<ReaderAllocFn>,
    metrics: BootstrapMetrics,
}

impl fmt::Debug for FilesystemBootstrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesystemBootstrapper")
            .field("config", &self.config)
            .field("fileset_root", &self.fileset_root)
            .field("persist_manager", &self.persist_manager)
            .finish_non_exhaustive()
    }
}

impl FilesystemBootstrapper {
    /// An engine over the fileset directory `fileset_root`, registering its
    /// metrics with `registry`.
    pub fn new(
        config: BootstrapConfig,
        fileset_root: impl Into<PathBuf>,
        registry: &prometheus::Registry,
    ) -> Self {
        let fileset_root = fileset_root.into();
        let persist_manager: Arc<dyn IndexPersistManager> =
            Arc::new(FsIndexPersistManager::new(&fileset_root));
        let alloc_root = fileset_root.clone();
        Self {
            config,
            persist_manager,
            reader_alloc: Arc::new(move || {
                Box::new(FsDataReader::new(alloc_root.clone())) as Box<dyn DataFileSetReader>
            }),
            metrics: BootstrapMetrics::new(registry),
            fileset_root,
        }
    }

    /// Replace the index persist manager, e.g. with a recording fake or a
    /// different storage backend.
    pub fn with_persist_manager(mut self, persist_manager: Arc<dyn IndexPersistManager>) -> Self {
        self.persist_manager = persist_manager;
        self
    }

    /// Replace the fileset reader factory used by the reader pool.
    pub fn with_reader_allocator(mut self, alloc: Arc<ReaderAllocFn>) -> Self {
        self.reader_alloc = alloc;
        self
    }

    /// Which of the requested data ranges durable storage could plausibly
    /// satisfy, judged from info files without opening any data files.
    pub async fn available_data(
        &self,
        namespace: &Namespace,
        ranges: &ShardTimeRanges,
    ) -> ShardTimeRanges {
        availability(&self.fileset_root, namespace, ranges).await
    }

    /// Which of the requested index ranges could plausibly be built. The
    /// index is rebuilt from data fileset metadata, so this is the same
    /// judgment as [`available_data`](Self::available_data).
    pub async fn available_index(
        &self,
        namespace: &Namespace,
        ranges: &ShardTimeRanges,
    ) -> ShardTimeRanges {
        availability(&self.fileset_root, namespace, ranges).await
    }

    /// Bootstrap every requested namespace: all data runs first, then an
    /// index run for each namespace with indexing enabled.
    pub async fn read(&self, namespaces: Namespaces) -> Result<NamespaceResults, BootstrapError> {
        let mut results = NamespaceResults::default();

        for request in namespaces.iter() {
            let span = info_span!("bootstrap_run", run = "data", namespace = %request.namespace.id());
            let run_result = self.run(RunType::Data, request).instrument(span).await?;
            results.insert_data(request.namespace.id().clone(), run_result.data);
        }

        for request in namespaces.iter() {
            if !request.namespace.index().enabled {
                continue;
            }
            let span = info_span!("bootstrap_run", run = "index", namespace = %request.namespace.id());
            let run_result = self.run(RunType::Index, request).instrument(span).await?;
            results.set_index(request.namespace.id(), run_result.index);
        }

        Ok(results)
    }

    async fn run(
        &self,
        run: RunType,
        request: &NamespaceBootstrap,
    ) -> Result<RunResult, BootstrapError> {
        if request.ranges.is_empty() {
            return Ok(RunResult::default());
        }

        // Under any cache policy short of cache-all, blocks are faulted in
        // on demand later; report availability without opening data files.
        if run == RunType::Data && self.config.cache_policy != CachePolicy::CacheAll {
            return Ok(self.data_run_result_from_availability(request).await);
        }

        let mut ranges = request.ranges.clone();
        let mut fast_path = None;
        if run == RunType::Index {
            let (persisted_fulfilled, persisted_result) = bootstrap_from_index_persisted_blocks(
                &self.fileset_root,
                &request.namespace,
                &ranges,
                &self.metrics,
            )
            .await;
            if !persisted_fulfilled.is_empty() {
                info!(
                    namespace = %request.namespace.id(),
                    "satisfied index ranges from persisted segments"
                );
            }
            ranges.subtract(&persisted_fulfilled);
            if ranges.is_empty() {
                return Ok(RunResult {
                    data: DataBootstrapResult::default(),
                    index: persisted_result,
                });
            }
            fast_path = Some(persisted_result);
        }

        let block_size = match run {
            RunType::Data => request.namespace.retention().block_size,
            RunType::Index => request.namespace.index().block_size,
        };
        let workers = match run {
            RunType::Data => self.config.data_workers,
            RunType::Index => self.config.index_workers,
        }
        .max(1);

        // The pool lives for this call only; readers do not outlive a run.
        let pool = Arc::new(ReaderPool::new(
            self.config.reader_pool_capacity,
            Arc::clone(&self.reader_alloc),
        ));
        let (tx, mut rx) = mpsc::channel(1);
        let producer = tokio::spawn(enqueue_readers(
            self.fileset_root.clone(),
            request.namespace.id().clone(),
            block_size,
            ranges,
            Arc::clone(&pool),
            tx,
        ));

        let ctx = Arc::new(LoadContext::new(
            run,
            request.namespace.clone(),
            request.run_options,
            &self.config,
            Arc::clone(&request.accumulator),
            Arc::clone(&self.persist_manager),
            self.metrics.clone(),
        ));
        let shared = SharedRunResult::default();
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks: JoinSet<()> = JoinSet::new();

        while let Some(window) = rx.recv().await {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .expect("bootstrap worker semaphore closed");
            let ctx = Arc::clone(&ctx);
            let shared = shared.clone();
            let pool = Arc::clone(&pool);
            tasks.spawn(async move {
                load_time_window(&ctx, &shared, window, &pool).await;
                drop(permit);
            });
        }

        producer.await?;
        while let Some(joined) = tasks.join_next().await {
            joined?;
        }

        let mut result = shared.take();
        if let Some(fast) = fast_path {
            result.index = merged_index_result(fast, result.index);
        }
        Ok(result)
    }

    async fn data_run_result_from_availability(&self, request: &NamespaceBootstrap) -> RunResult {
        let available = availability(&self.fileset_root, &request.namespace, &request.ranges).await;
        let mut unfulfilled = request.ranges.clone();
        unfulfilled.subtract(&available);
        RunResult {
            data: DataBootstrapResult::new(available, unfulfilled),
            index: Default::default(),
        }
    }
}
