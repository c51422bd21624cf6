//! Events delivered to the host through the watcher's channel

use crate::error::SyncError;
use crate::item::FileItem;

/// Direction of a dispatched operation, as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// The path was removed locally; the remote copy is being deleted
    LocalDelete,
    /// The path is being uploaded to the remote side
    Upload,
    /// The path was removed remotely; the local copy is being deleted
    RemoteDelete,
    /// The path is being downloaded to the local side
    Download,
}

/// One event from the sync worker.
///
/// File transfers emit a `done = false` event before the transfer starts and
/// a `done = true` event after it completes; deletions and directory or
/// symlink operations emit only the completion. The channel closing is the
/// worker's cleanup signal.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    File {
        item: FileItem,
        kind: TransferKind,
        done: bool,
    },
    Error(SyncError),
}

impl WatchEvent {
    #[must_use]
    pub fn file(item: FileItem, kind: TransferKind, done: bool) -> Self {
        Self::File { item, kind, done }
    }
}
