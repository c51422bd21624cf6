//! Worker-owned state and the shared worker context

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use driftsync_core::{DirList, DirSnapshot, SyncError, WatchEvent, WatcherConfig};
use driftsync_transport::{record_error, Endpoint, ErrorSlot};

/// Snapshots, directory lists and the consecutive-error counter.
///
/// Owned by the worker while it runs and handed back to the [`Watcher`]
/// when it stops, so the host can only touch it between runs.
///
/// [`Watcher`]: crate::Watcher
#[derive(Debug)]
pub struct SyncState {
    pub local_snap: DirSnapshot,
    pub remote_snap: DirSnapshot,
    pub base_snap: DirSnapshot,
    pub local_dirs: DirList,
    pub remote_dirs: DirList,
    /// Consecutive remote walk failures; reaching the configured threshold
    /// triggers the reconnect sub-loop
    pub err_count: u32,
}

impl SyncState {
    #[must_use]
    pub fn new(local_root: &str, remote_root: &str) -> Self {
        Self {
            local_snap: DirSnapshot::new(),
            remote_snap: DirSnapshot::new(),
            base_snap: DirSnapshot::new(),
            local_dirs: DirList::new(local_root),
            remote_dirs: DirList::new(remote_root),
            err_count: 0,
        }
    }

    /// Reset to the configured root pair: empty snapshots, root-only
    /// directory lists, zeroed error counter.
    pub fn clear(&mut self) {
        self.local_snap.clear();
        self.remote_snap.clear();
        self.base_snap.clear();
        self.local_dirs.reset();
        self.remote_dirs.reset();
        self.err_count = 0;
    }
}

/// Everything the worker task needs for one run
pub(crate) struct Worker {
    pub config: Arc<WatcherConfig>,
    pub remote: Box<dyn Endpoint>,
    pub local: Box<dyn Endpoint>,
    pub state: SyncState,
    pub events: mpsc::Sender<WatchEvent>,
    pub stop: Arc<AtomicBool>,
    pub errors: ErrorSlot,
}

impl Worker {
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Deliver one event to the host. The channel is bounded at one slot,
    /// so the send suspends until the previous event was consumed. A closed
    /// channel means the host dropped the receiver; that ends the run. A
    /// raised stop flag abandons the send so a host that has stopped
    /// draining cannot wedge the shutdown.
    pub async fn emit(&mut self, event: WatchEvent) {
        tokio::select! {
            sent = self.events.send(event) => {
                if sent.is_err() {
                    warn!("event receiver dropped, stopping the worker");
                    self.stop.store(true, Ordering::Release);
                }
            }
            () = stop_raised(&self.stop) => {}
        }
    }

    /// Record `err` in the last-error slot and deliver it as an event
    pub async fn emit_error(&mut self, err: SyncError) {
        let err = record_error(&self.errors, err);
        self.emit(WatchEvent::Error(err)).await;
    }
}

/// Resolve once the stop flag rises
async fn stop_raised(stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
}
