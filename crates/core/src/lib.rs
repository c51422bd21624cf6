//! driftsync-core: data model and reconciliation logic
//!
//! Provides the file/attribute model, the three snapshots, the directory
//! lists, the pure three-way merge, and the shared configuration, error and
//! event types.

pub mod config;
pub mod diff;
pub mod error;
pub mod event;
pub mod item;
pub mod queue;
pub mod snapshot;
pub mod status;

pub use config::WatcherConfig;
pub use diff::{merge_snapshots, Ins};
pub use error::{ErrorOrigin, SyncError};
pub use event::{TransferKind, WatchEvent};
pub use item::{FileAttrs, FileItem, FileKind};
pub use queue::{EntryKey, SyncQueue};
pub use snapshot::{snap_key, DirList, DirSnapshot, Directory, PathFile, ROOT_KEY};
pub use status::SessionStatus;
