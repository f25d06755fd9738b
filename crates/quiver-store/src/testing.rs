//! Backends with injected faults for exercising partial-failure paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::memory::InMemoryBackend;
use crate::traits::{KvBackend, Region, ScanVisitor, WriteBatch};

/// Wraps an [`InMemoryBackend`] and fails the `fail_on`-th commit (1-based)
/// that touches `region`. Every other call is passed through.
pub(crate) struct FaultyBackend {
    pub(crate) inner: Arc<InMemoryBackend>,
    region: Region,
    fail_on: usize,
    seen: AtomicUsize,
}

impl FaultyBackend {
    pub(crate) fn new(region: Region, fail_on: usize) -> Self {
        Self {
            inner: Arc::new(InMemoryBackend::new()),
            region,
            fail_on,
            seen: AtomicUsize::new(0),
        }
    }
}

impl KvBackend for FaultyBackend {
    fn get(&self, region: Region, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(region, key)
    }

    fn read_with(
        &self,
        region: Region,
        key: &[u8],
        visit: &mut dyn FnMut(&[u8]) -> StoreResult<()>,
    ) -> StoreResult<bool> {
        self.inner.read_with(region, key, visit)
    }

    fn scan(&self, region: Region, visit: &mut ScanVisitor<'_>) -> StoreResult<()> {
        self.inner.scan(region, visit)
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.touches(self.region) {
            let n = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_on {
                return Err(StoreError::Backend("injected failure".into()));
            }
        }
        self.inner.commit(batch)
    }

    fn flush(&self) -> StoreResult<()> {
        self.inner.flush()
    }
}

/// Commits a pending batch right after the next metadata scan completes,
/// standing in for a concurrent writer racing a query.
pub(crate) struct RacingBackend {
    pub(crate) inner: InMemoryBackend,
    after_scan: Mutex<Option<WriteBatch>>,
}

impl RacingBackend {
    pub(crate) fn new() -> Self {
        Self {
            inner: InMemoryBackend::new(),
            after_scan: Mutex::new(None),
        }
    }

    pub(crate) fn after_next_scan(&self, batch: WriteBatch) {
        *self.after_scan.lock() = Some(batch);
    }
}

impl KvBackend for RacingBackend {
    fn get(&self, region: Region, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(region, key)
    }

    fn read_with(
        &self,
        region: Region,
        key: &[u8],
        visit: &mut dyn FnMut(&[u8]) -> StoreResult<()>,
    ) -> StoreResult<bool> {
        self.inner.read_with(region, key, visit)
    }

    fn scan(&self, region: Region, visit: &mut ScanVisitor<'_>) -> StoreResult<()> {
        self.inner.scan(region, visit)?;
        if region == Region::Meta {
            if let Some(batch) = self.after_scan.lock().take() {
                self.inner.commit(batch)?;
            }
        }
        Ok(())
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        self.inner.commit(batch)
    }

    fn flush(&self) -> StoreResult<()> {
        self.inner.flush()
    }
}
