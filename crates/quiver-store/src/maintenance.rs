//! Periodic background maintenance for an open bucket.
//!
//! Each tick flushes the engine and, when enabled, runs a reconciliation
//! pass under the exclusive repair gate. Failures are logged and the task
//! keeps running.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::MaintenanceConfig;
use crate::error::{StoreError, StoreResult};
use crate::repair;
use crate::traits::KvBackend;

pub(crate) struct Maintenance {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Maintenance {
    pub(crate) fn spawn(
        backend: Arc<dyn KvBackend>,
        gate: Arc<RwLock<()>>,
        config: &MaintenanceConfig,
    ) -> StoreResult<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = config.interval();
        let repair = config.repair;
        let handle = thread::Builder::new()
            .name("quiver-maintenance".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(backend.as_ref(), &gate, repair),
                    // Stop requested or the bucket is gone.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        debug!(interval_secs = interval.as_secs(), repair, "maintenance task started");
        Ok(Self { stop_tx, handle })
    }

    /// Signal the task and wait for it to finish its current tick.
    pub(crate) fn stop(self) -> StoreResult<()> {
        // The receiver is gone only if the thread already exited.
        let _ = self.stop_tx.send(());
        self.handle
            .join()
            .map_err(|_| StoreError::Backend("maintenance task panicked".into()))?;
        debug!("maintenance task stopped");
        Ok(())
    }
}

fn tick(backend: &dyn KvBackend, gate: &RwLock<()>, repair: bool) {
    if let Err(e) = backend.flush() {
        warn!(error = %e, "maintenance flush failed");
    }
    if repair {
        let _exclusive = gate.write();
        if let Err(e) = repair::reconcile(backend) {
            warn!(error = %e, "maintenance reconciliation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use crate::traits::{Region, WriteBatch};
    use std::time::{Duration, Instant};

    fn config(interval_secs: u64, repair: bool) -> MaintenanceConfig {
        MaintenanceConfig {
            enabled: true,
            interval_secs,
            repair,
        }
    }

    #[test]
    fn repairs_on_tick() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .commit(WriteBatch::new().put(Region::Payload, "orphan", "data"))
            .unwrap();

        let task = Maintenance::spawn(backend.clone(), Arc::new(RwLock::new(())), &config(1, true)).unwrap();
        thread::sleep(Duration::from_millis(2500));
        task.stop().unwrap();

        assert_eq!(backend.len(Region::Payload).unwrap(), 0);
    }

    #[test]
    fn flush_only_leaves_data_alone() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .commit(WriteBatch::new().put(Region::Payload, "orphan", "data"))
            .unwrap();

        let task = Maintenance::spawn(backend.clone(), Arc::new(RwLock::new(())), &config(1, false)).unwrap();
        thread::sleep(Duration::from_millis(1500));
        task.stop().unwrap();

        assert_eq!(backend.len(Region::Payload).unwrap(), 1);
    }

    #[test]
    fn stop_does_not_wait_for_interval() {
        let backend = Arc::new(InMemoryBackend::new());
        let task = Maintenance::spawn(backend, Arc::new(RwLock::new(())), &config(3600, true)).unwrap();
        let start = Instant::now();
        task.stop().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
