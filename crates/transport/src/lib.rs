//! driftsync-transport: filesystem adapters
//!
//! Both sides of the watcher speak the same [`Endpoint`] surface: the SFTP
//! endpoint drives a remote server over SSH, the local endpoint drives the
//! host filesystem. The trait exists so the engine can be exercised against
//! two local endpoints without a server.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use driftsync_core::{Directory, FileAttrs, FileItem, SyncError};

pub mod local;
pub mod sftp;

pub use local::LocalEndpoint;
pub use sftp::SftpEndpoint;

/// Transfer buffer size; the largest SFTP data packet most servers accept
pub const TRANSFER_BUF_SIZE: usize = 30_000;

/// Shared slot holding the most recent error; every adapter failure path
/// stores into it before returning.
pub type ErrorSlot = Arc<Mutex<Option<SyncError>>>;

/// Record `err` in the slot, passing the error back to the caller
pub fn record_error(slot: &ErrorSlot, err: SyncError) -> SyncError {
    *slot.lock().expect("error slot poisoned") = Some(err.clone());
    err
}

/// Absolute path of a root-relative entry name
#[must_use]
pub fn abs_path(root: &str, name: &str) -> String {
    format!("{}/{name}", root.trim_end_matches('/'))
}

/// One side of the synchronizer.
///
/// Paths are absolute on the owning side. Session lifecycle methods default
/// to no-ops; only the SFTP endpoint overrides them.
#[async_trait]
pub trait Endpoint: Send {
    /// Absolute root directory of this side
    fn root(&self) -> &str;

    /// Establish the underlying session. No-op for local filesystems.
    async fn connect(&mut self) -> Result<(), SyncError> {
        Ok(())
    }

    /// Authenticate the session. No-op for local filesystems.
    async fn authenticate(&mut self) -> Result<(), SyncError> {
        Ok(())
    }

    /// Tear the session down. Idempotent; no-op for local filesystems.
    async fn disconnect(&mut self) {}

    /// Enumerate one directory. Entries carry root-relative names; the
    /// `.`/`..` sentinels are filtered out.
    async fn list_dir(&mut self, dir: &Directory) -> Result<Vec<FileItem>, SyncError>;

    /// Fetch the attribute record of a path (without following symlinks)
    async fn stat(&mut self, path: &str) -> Result<FileAttrs, SyncError>;

    /// Push an attribute record onto a path (times, permissions)
    async fn set_stat(&mut self, path: &str, attrs: &FileAttrs) -> Result<(), SyncError>;

    /// Open a file for streamed reading
    async fn open_read(
        &mut self,
        path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, SyncError>;

    /// Open a file for streamed writing, creating or truncating it
    async fn open_write(
        &mut self,
        path: &str,
        perm: u32,
    ) -> Result<Box<dyn AsyncWrite + Send + Unpin>, SyncError>;

    /// Apply the source attributes after the write handle is closed
    async fn finish_write(&mut self, path: &str, attrs: &FileAttrs) -> Result<(), SyncError>;

    /// Create a directory. Idempotent: an existing directory only gets its
    /// attributes refreshed; an existing non-directory is an error.
    async fn mkdir(&mut self, path: &str, attrs: &FileAttrs) -> Result<(), SyncError>;

    /// Unlink a file
    async fn remove_file(&mut self, path: &str) -> Result<(), SyncError>;

    /// Recursively remove a directory tree
    async fn remove_dir_all(&mut self, path: &str) -> Result<(), SyncError>;

    /// Read a symlink target
    async fn read_link(&mut self, path: &str) -> Result<String, SyncError>;

    /// Create a symlink at `path`, replacing an existing symlink there.
    /// The link's own times are set from `attrs` where the platform allows
    /// it, so a recreated link still compares equal to its source.
    async fn make_symlink(
        &mut self,
        path: &str,
        target: &str,
        attrs: &FileAttrs,
    ) -> Result<(), SyncError>;
}
