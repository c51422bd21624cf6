//! Snapshots and directory lists
//!
//! A snapshot is an ordered mapping from directory key to directory
//! contents; three exist per watcher (local, remote, base). The directory
//! lists hold the set of directories each side walks, keyed by the same key
//! space.

use std::collections::BTreeMap;

use crate::item::FileItem;

/// Snapshot key of the root directory
pub const ROOT_KEY: &str = "/";

/// Compute the snapshot key for a root-relative path.
///
/// The root itself (empty relative path) maps to `"/"`; every other key is
/// the relative path with a leading separator, so `sub/inner` keys as
/// `/sub/inner`.
#[must_use]
pub fn snap_key(rela: &str) -> String {
    if rela.is_empty() {
        ROOT_KEY.to_string()
    } else {
        format!("/{rela}")
    }
}

/// A directory tracked by one side of the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    /// Absolute path on the owning side
    pub abs: String,
    /// Path relative to the root; empty for the root itself
    pub rela: String,
    /// Nesting depth, root = 0; reserved for a maximum-depth policy
    pub depth: u8,
}

impl Directory {
    /// The root directory of a tree
    #[must_use]
    pub fn root(abs: impl Into<String>) -> Self {
        Self {
            abs: abs.into(),
            rela: String::new(),
            depth: 0,
        }
    }

    /// A child directory discovered inside `self`.
    ///
    /// `rela` is the child's root-relative path (as carried by its
    /// [`FileItem`]); the absolute path appends only the leaf component.
    #[must_use]
    pub fn child(&self, rela: &str) -> Self {
        let leaf = rela.rsplit('/').next().unwrap_or(rela);
        Self {
            abs: format!("{}/{leaf}", self.abs),
            rela: rela.to_string(),
            depth: self.depth.saturating_add(1),
        }
    }

    /// Snapshot key of this directory
    #[must_use]
    pub fn key(&self) -> String {
        snap_key(&self.rela)
    }
}

/// Contents of one directory, keyed by root-relative entry name
pub type PathFile = BTreeMap<String, FileItem>;

/// One side's snapshot: directory key to directory contents
pub type DirSnapshot = BTreeMap<String, PathFile>;

/// Ordered set of directories one side walks, keyed by snapshot key.
///
/// Always contains the root entry; [`DirList::reset`] drops everything else.
#[derive(Debug, Clone)]
pub struct DirList {
    entries: BTreeMap<String, Directory>,
}

impl DirList {
    /// A list containing only the root directory for `abs`
    #[must_use]
    pub fn new(root_abs: impl Into<String>) -> Self {
        let root = Directory::root(root_abs);
        let mut entries = BTreeMap::new();
        entries.insert(ROOT_KEY.to_string(), root);
        Self { entries }
    }

    /// Insert a directory under its snapshot key; returns true when the key
    /// was not present before. Re-discovery of a known key is tolerated and
    /// leaves the existing entry in place.
    pub fn insert(&mut self, dir: Directory) -> bool {
        let key = dir.key();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, dir);
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<Directory> {
        if key == ROOT_KEY {
            return None;
        }
        self.entries.remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Directory> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Snapshot keys in iteration order
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The root directory entry
    #[must_use]
    pub fn root(&self) -> &Directory {
        &self.entries[ROOT_KEY]
    }

    /// Drop every entry except the root
    pub fn reset(&mut self) {
        self.entries.retain(|key, _| key == ROOT_KEY);
        debug_assert_eq!(self.entries.len(), 1);
    }
}
