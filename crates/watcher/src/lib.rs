//! driftsync-watcher: the continuous synchronizer
//!
//! A [`Watcher`] keeps one local directory tree and one remote SFTP tree
//! identical. A dedicated worker task periodically walks both trees,
//! three-way-diffs them against the last-known-in-sync base snapshot, and
//! dispatches uploads, downloads and deletions, emitting a [`WatchEvent`]
//! per observed change through a bounded channel.
//!
//! ```no_run
//! use driftsync_core::{WatchEvent, WatcherConfig};
//! use driftsync_watcher::Watcher;
//!
//! # async fn run(config: WatcherConfig) -> Result<(), driftsync_core::SyncError> {
//! let mut watcher = Watcher::new(config)?;
//! watcher.connect().await?;
//!
//! let mut events = watcher.start()?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         WatchEvent::File { item, kind, done } => println!("{kind:?} {done} {}", item.name),
//!         WatchEvent::Error(err) => eprintln!("{err}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod context;
mod driver;
mod engine;
mod walk;
mod watcher;

pub use context::SyncState;
pub use watcher::Watcher;

pub use driftsync_core::{
    SessionStatus, SyncError, TransferKind, WatchEvent, WatcherConfig,
};
pub use driftsync_transport::{Endpoint, ErrorSlot, LocalEndpoint, SftpEndpoint};
