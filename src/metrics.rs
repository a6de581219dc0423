//! Bootstrap metrics.

use prometheus::{IntCounter, Registry};
use tracing::warn;

/// Counters tracking index fileset traffic during bootstrap.
///
/// Cloning is cheap; all clones share the same underlying counters.
#[derive(Debug, Clone)]
pub(crate) struct BootstrapMetrics {
    /// Persisted index blocks read back via the fast path.
    pub(crate) persist_index_blocks_read: IntCounter,
    /// Rebuilt index blocks flushed to durable storage.
    pub(crate) persist_index_blocks_write: IntCounter,
}

impl BootstrapMetrics {
    pub(crate) fn new(registry: &Registry) -> Self {
        Self {
            persist_index_blocks_read: register_counter(
                registry,
                "persist_index_blocks_read",
                "Number of persisted index blocks read during bootstrap",
            ),
            persist_index_blocks_write: register_counter(
                registry,
                "persist_index_blocks_write",
                "Number of rebuilt index blocks persisted during bootstrap",
            ),
        }
    }
}

fn register_counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("statically valid counter options");
    if let Err(error) = registry.register(Box::new(counter.clone())) {
        // The counter still works unregistered; it just won't be scraped.
        warn!(%error, name, "failed to register bootstrap metric");
    }
    counter
}
