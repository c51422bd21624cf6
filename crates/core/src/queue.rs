//! Work queue built by the diff phase and drained by the dispatcher

use crate::item::FileItem;

/// Key of an entry inside a snapshot: `(directory key, entry name)`.
///
/// The new-item queues reference the base snapshot through these keys and
/// re-resolve them at dispatch time, so the queue never holds a stale view
/// of an entry the diff may still rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryKey {
    pub dir: String,
    pub name: String,
}

impl EntryKey {
    #[must_use]
    pub fn new(dir: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }
}

/// The four operation queues of one pass.
///
/// Drain order is a contract: `l_del`, `r_del`, `r_new`, `l_new`. The delete
/// queues own their items because the diff removes the snapshot entries they
/// came from.
#[derive(Debug, Default)]
pub struct SyncQueue {
    /// Paths removed locally; the deletion is applied to the remote side
    pub l_del: Vec<FileItem>,
    /// Paths removed remotely; the deletion is applied to the local side
    pub r_del: Vec<FileItem>,
    /// Paths to download (base-snapshot keys)
    pub r_new: Vec<EntryKey>,
    /// Paths to upload (base-snapshot keys)
    pub l_new: Vec<EntryKey>,
    /// Paths that are a directory on one side and not on the other; an
    /// unsupported condition, surfaced as an error and left untouched
    pub shadowed: Vec<FileItem>,
}

impl SyncQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.l_del.is_empty()
            && self.r_del.is_empty()
            && self.r_new.is_empty()
            && self.l_new.is_empty()
            && self.shadowed.is_empty()
    }

    /// Total number of queued entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.l_del.len()
            + self.r_del.len()
            + self.r_new.len()
            + self.l_new.len()
            + self.shadowed.len()
    }
}
