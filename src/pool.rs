//! A bounded mailbox of idle fileset readers.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::fileset::{DataFileSetReader, ReaderAllocFn};

/// Recycles closed-but-allocated readers across time windows within one
/// bootstrap run, allocating cold when the mailbox is empty.
///
/// Only cleanly closed readers are returned; a reader whose close failed is
/// simply dropped, so the pool never holds dirty state.
pub(crate) struct ReaderPool {
    readers: Mutex<Vec<Box<dyn DataFileSetReader>>>,
    capacity: usize,
    alloc: Arc<ReaderAllocFn>,
}

impl ReaderPool {
    pub(crate) fn new(capacity: usize, alloc: Arc<ReaderAllocFn>) -> Self {
        Self {
            readers: Mutex::new(Vec::with_capacity(capacity.min(16))),
            capacity,
            alloc,
        }
    }

    /// An idle reader, or a freshly allocated one.
    pub(crate) fn get(&self) -> Box<dyn DataFileSetReader> {
        if let Some(reader) = self.readers.lock().pop() {
            return reader;
        }
        (self.alloc)()
    }

    /// Return `reader` for reuse; dropped if the mailbox is full.
    pub(crate) fn put(&self, reader: Box<dyn DataFileSetReader>) {
        let mut readers = self.readers.lock();
        if readers.len() < self.capacity {
            readers.push(reader);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.readers.lock().len()
    }
}

impl fmt::Debug for ReaderPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderPool")
            .field("idle", &self.readers.lock().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::fileset::FsDataReader;

    fn counting_pool(capacity: usize) -> (ReaderPool, Arc<AtomicUsize>) {
        let allocs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&allocs);
        let pool = ReaderPool::new(
            capacity,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::new(FsDataReader::new("/nonexistent")) as Box<dyn DataFileSetReader>
            }),
        );
        (pool, allocs)
    }

    #[test]
    fn reuses_returned_readers() {
        let (pool, allocs) = counting_pool(4);

        let reader = pool.get();
        assert_eq!(allocs.load(Ordering::SeqCst), 1);
        pool.put(reader);
        assert_eq!(pool.idle(), 1);

        let _reader = pool.get();
        assert_eq!(allocs.load(Ordering::SeqCst), 1, "no cold allocation");
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn drops_readers_beyond_capacity() {
        let (pool, _) = counting_pool(1);
        let first = pool.get();
        let second = pool.get();
        pool.put(first);
        pool.put(second);
        assert_eq!(pool.idle(), 1);
    }
}
