//! Walk phase: enumerate one side's tracked directories
//!
//! The walk visits the side's directory list in key order, merging what it
//! sees into the side snapshot and recording every visited directory and
//! every changed entry name in `ins`. Subdirectories discovered along the
//! way join the list and are walked within the same pass.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use driftsync_core::{DirList, DirSnapshot, Ins, SyncError};
use driftsync_transport::Endpoint;

/// Walk every directory of one side.
///
/// `counter` is the consecutive-error counter for sides whose walk failures
/// feed the reconnect logic; an open failure increments it and truncates the
/// walk, a successful open resets it. A directory that is simply gone is
/// dropped from the list instead (its snapshot entries are reconciled by the
/// parent walk and the orphan sweep).
pub(crate) async fn walk_side(
    endpoint: &mut dyn Endpoint,
    dirs: &mut DirList,
    snap: &mut DirSnapshot,
    ins: &mut Ins,
    mut counter: Option<&mut u32>,
    stop: &AtomicBool,
) -> Result<(), SyncError> {
    let mut pending: VecDeque<String> = dirs.keys().into();

    while let Some(key) = pending.pop_front() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let Some(dir) = dirs.get(&key).cloned() else {
            continue;
        };

        let listing = match endpoint.list_dir(&dir).await {
            Ok(listing) => listing,
            Err(err) => {
                if endpoint.stat(&dir.abs).await.is_err() {
                    // the directory itself vanished; stop tracking it and
                    // let the parent's removal record drive the cleanup
                    debug!(dir = %dir.abs, "tracked directory is gone");
                    dirs.remove(&key);
                    continue;
                }
                if let Some(count) = counter.as_deref_mut() {
                    *count += 1;
                    warn!(dir = %dir.abs, errors = *count, error = %err, "walk truncated");
                }
                return Err(err);
            }
        };
        if let Some(count) = counter.as_deref_mut() {
            *count = 0;
        }

        let contents = snap.entry(key.clone()).or_default();
        let changed = ins.entry(key.clone()).or_default();
        let mut current: BTreeSet<String> = BTreeSet::new();

        for item in listing {
            if item.name.is_empty() {
                continue;
            }
            current.insert(item.name.clone());

            let unchanged = contents.get(&item.name).is_some_and(|prev| !prev.differs(&item));
            if unchanged {
                continue;
            }

            changed.insert(item.name.clone());
            if item.kind.is_dir() {
                let child = dir.child(&item.name);
                let child_key = child.key();
                if dirs.insert(child) {
                    pending.push_back(child_key);
                }
            }
            contents.insert(item.name.clone(), item);
        }

        // entries that disappeared since the last pass count as changes too
        let gone: Vec<String> = contents
            .keys()
            .filter(|name| !current.contains(*name))
            .cloned()
            .collect();
        for name in gone {
            changed.insert(name.clone());
            contents.remove(&name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    use driftsync_transport::LocalEndpoint;

    fn fixture(dir: &TempDir) -> (LocalEndpoint, DirList, DirSnapshot, Ins) {
        let root = dir.path().to_string_lossy().into_owned();
        (
            LocalEndpoint::new(root.clone(), Arc::default()),
            DirList::new(root),
            DirSnapshot::new(),
            Ins::new(),
        )
    }

    #[tokio::test]
    async fn test_walk_discovers_nested_directories_in_one_pass() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/deep.txt"), "deep").unwrap();
        fs::write(dir.path().join("top.txt"), "top").unwrap();

        let (mut endpoint, mut dirs, mut snap, mut ins) = fixture(&dir);
        let stop = AtomicBool::new(false);
        walk_side(&mut endpoint, &mut dirs, &mut snap, &mut ins, None, &stop)
            .await
            .unwrap();

        assert!(dirs.contains("/a"));
        assert!(dirs.contains("/a/b"));
        assert!(ins.contains_key("/"));
        assert!(ins.contains_key("/a"));
        assert!(ins.contains_key("/a/b"));
        assert!(snap["/a/b"].contains_key("a/b/deep.txt"));
        assert!(ins["/a/b"].contains("a/b/deep.txt"));
    }

    #[tokio::test]
    async fn test_second_walk_of_unchanged_tree_records_no_changes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("same.txt"), "same").unwrap();

        let (mut endpoint, mut dirs, mut snap, mut ins) = fixture(&dir);
        let stop = AtomicBool::new(false);
        walk_side(&mut endpoint, &mut dirs, &mut snap, &mut ins, None, &stop)
            .await
            .unwrap();
        assert_eq!(ins["/"].len(), 1);

        let mut ins = Ins::new();
        walk_side(&mut endpoint, &mut dirs, &mut snap, &mut ins, None, &stop)
            .await
            .unwrap();
        assert!(ins["/"].is_empty());
    }

    #[tokio::test]
    async fn test_walk_records_removal_as_change() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("gone.txt"), "x").unwrap();

        let (mut endpoint, mut dirs, mut snap, mut ins) = fixture(&dir);
        let stop = AtomicBool::new(false);
        walk_side(&mut endpoint, &mut dirs, &mut snap, &mut ins, None, &stop)
            .await
            .unwrap();

        fs::remove_file(dir.path().join("gone.txt")).unwrap();
        let mut ins = Ins::new();
        walk_side(&mut endpoint, &mut dirs, &mut snap, &mut ins, None, &stop)
            .await
            .unwrap();

        assert!(ins["/"].contains("gone.txt"));
        assert!(!snap["/"].contains_key("gone.txt"));
    }

    #[tokio::test]
    async fn test_vanished_directory_is_dropped_from_the_list() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/f.txt"), "x").unwrap();

        let (mut endpoint, mut dirs, mut snap, mut ins) = fixture(&dir);
        let stop = AtomicBool::new(false);
        let mut count = 0;
        walk_side(
            &mut endpoint,
            &mut dirs,
            &mut snap,
            &mut ins,
            Some(&mut count),
            &stop,
        )
        .await
        .unwrap();
        assert!(dirs.contains("/sub"));

        fs::remove_dir_all(dir.path().join("sub")).unwrap();
        let mut ins = Ins::new();
        walk_side(
            &mut endpoint,
            &mut dirs,
            &mut snap,
            &mut ins,
            Some(&mut count),
            &stop,
        )
        .await
        .unwrap();

        assert!(!dirs.contains("/sub"));
        assert_eq!(count, 0);
        // the parent recorded the removal
        assert!(ins["/"].contains("sub"));
    }
}
