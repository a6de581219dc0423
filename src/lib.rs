//! Filesystem bootstrap engine for a sharded, time-partitioned time-series
//! store.
//!
//! ## Bootstrap
//!
//! On process start (or namespace attach) the database hands this engine, per
//! namespace, the set of (shard, time range) tuples it wants restored from
//! local durable storage before accepting live traffic. The engine inspects
//! the on-disk fileset directories, determines which of the requested ranges
//! are covered by flushed filesets, and rehydrates two kinds of state:
//!
//! * **Data** — series blocks loaded into the in-memory series set through a
//!   caller-provided [`DataAccumulator`].
//! * **Index** — inverted-index segments mapping tag predicates to series,
//!   either read back from previously persisted index filesets or rebuilt
//!   from the metadata held in data filesets (and optionally re-persisted so
//!   the next restart short-circuits the rebuild).
//!
//! The engine reports, per (shard, time range), which parts of the request
//! were fulfilled and which were not. Missing, corrupt, or partially written
//! filesets never abort a bootstrap; their ranges are surfaced as unfulfilled
//! so an outer restore chain can satisfy them from another source.
//!
//! ## Concurrency
//!
//! Each run drives a single producer task that opens filesets and groups
//! them into per-block time-window readers, feeding a bounded pool of worker
//! tasks over a rendezvous channel. The producer paces itself to consumer
//! demand, bounding the number of concurrently open filesets. Data runs and
//! index runs use independently sized worker pools so a slow index rebuild
//! cannot starve data throughput.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub
)]

mod availability;
mod bootstrapper;
mod enqueue;
mod loader;
mod metrics;
mod pool;

pub mod accumulator;
pub mod config;
pub mod fileset;
pub mod index;
pub mod namespace;
pub mod ranges;
pub mod result;
pub mod types;

pub use bootstrapper::{
    BootstrapError, FilesystemBootstrapper, NamespaceBootstrap, Namespaces,
};

pub use accumulator::DataAccumulator;

#[cfg(test)]
mod test_util;
