//! Three-way snapshot merge
//!
//! One pass of the engine walks every tracked directory on both sides,
//! recording in `ins` which directories were visited and which entry names
//! changed. This module turns that record into the pass's work queue by
//! comparing the local and remote snapshots against the base snapshot.

use std::collections::{BTreeMap, BTreeSet};

use crate::item::FileItem;
use crate::queue::{EntryKey, SyncQueue};
use crate::snapshot::DirSnapshot;

/// Directories visited this pass, with the entry names observed as changed
/// (new, modified, or removed) inside each.
pub type Ins = BTreeMap<String, BTreeSet<String>>;

fn entry<'a>(snap: &'a DirSnapshot, dir: &str, name: &str) -> Option<&'a FileItem> {
    snap.get(dir).and_then(|contents| contents.get(name))
}

fn drop_entry(snap: &mut DirSnapshot, dir: &str, name: &str) {
    if let Some(contents) = snap.get_mut(dir) {
        contents.remove(name);
    }
}

/// Merge the three snapshots for every `(directory, name)` recorded in
/// `ins`, then sweep base directories that were not visited at all.
///
/// Decision table, with B/L/R = entry present in base/local/remote:
///
/// | B | L | R | action |
/// |---|---|---|--------|
/// | 0 | 0 | 1 | download: base := remote, enqueue `r_new` |
/// | 0 | 1 | 0 | upload: base := local, enqueue `l_new` |
/// | 1 | 1 | 0 | removed remotely: enqueue `r_del`, drop everywhere |
/// | 1 | 0 | 1 | removed locally: enqueue `l_del`, drop everywhere |
/// | 1 | 0 | 0 | gone on both sides: drop the stale base entry |
/// | - | 1 | 1 | kinds must agree, then the conflict check below |
///
/// Conflict check, with `lb`/`rb` = side differs from base (or base absent):
///
/// | lb | rb | action |
/// |----|----|--------|
/// | 0  | 0  | in sync, nothing to do |
/// | 1  | 0  | upload, base := local |
/// | 0  | 1  | download, base := remote |
/// | 1  | 1  | remote wins: download if the sides differ, else just refresh base |
pub fn merge_snapshots(
    local: &mut DirSnapshot,
    remote: &mut DirSnapshot,
    base: &mut DirSnapshot,
    ins: &Ins,
) -> SyncQueue {
    let mut queue = SyncQueue::new();

    for (dir, names) in ins {
        for name in names {
            let b = entry(base, dir, name).is_some();
            let l = entry(local, dir, name).is_some();
            let r = entry(remote, dir, name).is_some();

            match (b, l, r) {
                (false, false, true) => {
                    let item = remote[dir][name].clone();
                    base.entry(dir.clone()).or_default().insert(name.clone(), item);
                    queue.r_new.push(EntryKey::new(dir.clone(), name.clone()));
                }
                (false, true, false) => {
                    let item = local[dir][name].clone();
                    base.entry(dir.clone()).or_default().insert(name.clone(), item);
                    queue.l_new.push(EntryKey::new(dir.clone(), name.clone()));
                }
                (true, true, false) => {
                    queue.r_del.push(base[dir][name].clone());
                    drop_entry(base, dir, name);
                    drop_entry(remote, dir, name);
                    drop_entry(local, dir, name);
                }
                (true, false, true) => {
                    queue.l_del.push(base[dir][name].clone());
                    drop_entry(base, dir, name);
                    drop_entry(remote, dir, name);
                    drop_entry(local, dir, name);
                }
                (true, false, false) => {
                    // gone on both sides; nothing left to reconcile
                    drop_entry(base, dir, name);
                }
                (_, true, true) => {
                    // a directory on one side and a non-directory on the
                    // other cannot be reconciled; the equivalence check
                    // never sees the kind, so this must be caught here
                    if local[dir][name].kind != remote[dir][name].kind {
                        queue.shadowed.push(local[dir][name].clone());
                    } else {
                        check_conflict(local, remote, base, &mut queue, b, dir, name);
                    }
                }
                (false, false, false) => {
                    // an ins name with no snapshot entry anywhere is out of model
                    debug_assert!(false, "no snapshot entry for {dir} {name}");
                }
            }
        }
    }

    sweep_orphans(local, remote, base, ins, &mut queue);

    queue
}

/// Both sides hold the path; decide by comparing each against the base.
/// Remote wins when both diverged.
fn check_conflict(
    local: &mut DirSnapshot,
    remote: &mut DirSnapshot,
    base: &mut DirSnapshot,
    queue: &mut SyncQueue,
    base_present: bool,
    dir: &str,
    name: &str,
) {
    let local_item = local[dir][name].clone();
    let remote_item = remote[dir][name].clone();

    let lb_diff = !base_present || base[dir][name].differs(&local_item);
    let rb_diff = !base_present || base[dir][name].differs(&remote_item);

    match (lb_diff, rb_diff) {
        (false, false) => {}
        (true, false) => {
            base.entry(dir.to_string()).or_default().insert(name.to_string(), local_item);
            queue.l_new.push(EntryKey::new(dir, name));
        }
        (false, true) => {
            base.entry(dir.to_string()).or_default().insert(name.to_string(), remote_item);
            queue.r_new.push(EntryKey::new(dir, name));
        }
        (true, true) => {
            let diverged = local_item.differs(&remote_item);
            base.entry(dir.to_string()).or_default().insert(name.to_string(), remote_item);
            if diverged {
                queue.r_new.push(EntryKey::new(dir, name));
            }
            // identical moves on both sides only refresh the base
        }
    }
}

/// Remove every base directory key that no walk visited this pass: its
/// parent no longer lists it on either side. Entries are enqueued for both
/// delete queues so events still describe real observations, then erased
/// from all three snapshots.
fn sweep_orphans(
    local: &mut DirSnapshot,
    remote: &mut DirSnapshot,
    base: &mut DirSnapshot,
    ins: &Ins,
    queue: &mut SyncQueue,
) {
    let orphaned: Vec<String> = base
        .keys()
        .filter(|dir| !ins.contains_key(*dir))
        .cloned()
        .collect();

    for dir in orphaned {
        let contents = base.remove(&dir).unwrap_or_default();
        for (name, item) in contents {
            let local_item = entry(local, &dir, &name).cloned().unwrap_or_else(|| item.clone());
            let remote_item = entry(remote, &dir, &name).cloned().unwrap_or(item);
            queue.l_del.push(local_item);
            queue.r_del.push(remote_item);
        }
        local.remove(&dir);
        remote.remove(&dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{FileAttrs, FileKind};
    use crate::snapshot::PathFile;

    fn item(name: &str, size: u64, mtime: u32) -> FileItem {
        FileItem {
            name: name.to_string(),
            kind: FileKind::Regular,
            attrs: FileAttrs {
                size,
                mtime,
                ..FileAttrs::default()
            },
        }
    }

    fn with(snap: &mut DirSnapshot, dir: &str, it: FileItem) {
        snap.entry(dir.to_string()).or_default().insert(it.name.clone(), it);
    }

    fn visited(dirs_names: &[(&str, &[&str])]) -> Ins {
        dirs_names
            .iter()
            .map(|(dir, names)| {
                (
                    dir.to_string(),
                    names.iter().map(|n| n.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_initial_download() {
        let mut local = DirSnapshot::new();
        let mut remote = DirSnapshot::new();
        let mut base = DirSnapshot::new();
        with(&mut remote, "/", item("a.txt", 10, 1000));
        local.insert("/".to_string(), PathFile::default());

        let ins = visited(&[("/", &["a.txt"])]);
        let queue = merge_snapshots(&mut local, &mut remote, &mut base, &ins);

        assert_eq!(queue.r_new, vec![EntryKey::new("/", "a.txt")]);
        assert!(queue.l_new.is_empty());
        assert!(queue.l_del.is_empty() && queue.r_del.is_empty());
        assert_eq!(base["/"]["a.txt"], item("a.txt", 10, 1000));
    }


    #[test]
    fn test_initial_upload() {
        let mut local = DirSnapshot::new();
        let mut remote = DirSnapshot::new();
        let mut base = DirSnapshot::new();
        with(&mut local, "/", item("a.txt", 10, 1000));
        remote.insert("/".to_string(), PathFile::default());

        let ins = visited(&[("/", &["a.txt"])]);
        let queue = merge_snapshots(&mut local, &mut remote, &mut base, &ins);

        assert_eq!(queue.l_new, vec![EntryKey::new("/", "a.txt")]);
        assert!(queue.r_new.is_empty());
        assert_eq!(base["/"]["a.txt"], item("a.txt", 10, 1000));
    }

    #[test]
    fn test_remote_wins_conflict() {
        let mut local = DirSnapshot::new();
        let mut remote = DirSnapshot::new();
        let mut base = DirSnapshot::new();
        with(&mut base, "/", item("b.txt", 5, 500));
        with(&mut local, "/", item("b.txt", 7, 700));
        with(&mut remote, "/", item("b.txt", 9, 900));

        let ins = visited(&[("/", &["b.txt"])]);
        let queue = merge_snapshots(&mut local, &mut remote, &mut base, &ins);

        assert_eq!(queue.r_new, vec![EntryKey::new("/", "b.txt")]);
        assert!(queue.l_new.is_empty());
        assert_eq!(base["/"]["b.txt"], item("b.txt", 9, 900));
    }

    #[test]
    fn test_both_sides_moved_identically_refreshes_base_only() {
        let mut local = DirSnapshot::new();
        let mut remote = DirSnapshot::new();
        let mut base = DirSnapshot::new();
        with(&mut base, "/", item("b.txt", 5, 500));
        with(&mut local, "/", item("b.txt", 9, 900));
        with(&mut remote, "/", item("b.txt", 9, 900));

        let ins = visited(&[("/", &["b.txt"])]);
        let queue = merge_snapshots(&mut local, &mut remote, &mut base, &ins);

        assert!(queue.is_empty());
        assert_eq!(base["/"]["b.txt"], item("b.txt", 9, 900));
    }

    #[test]
    fn test_kind_mismatch_is_surfaced_not_synced() {
        let mut local = DirSnapshot::new();
        let mut remote = DirSnapshot::new();
        let mut base = DirSnapshot::new();

        // same size and mtime on purpose: by the equivalence rule alone
        // these would count as in sync
        let mut local_dir = item("x", 4096, 100);
        local_dir.kind = FileKind::Dir;
        with(&mut local, "/", local_dir.clone());
        with(&mut remote, "/", item("x", 4096, 100));

        let ins = visited(&[("/", &["x"])]);
        let queue = merge_snapshots(&mut local, &mut remote, &mut base, &ins);

        assert_eq!(queue.shadowed, vec![local_dir]);
        assert!(queue.l_new.is_empty() && queue.r_new.is_empty());
        assert!(queue.l_del.is_empty() && queue.r_del.is_empty());
        // both sides and the base are left alone
        assert!(entry(&base, "/", "x").is_none());
        assert!(entry(&local, "/", "x").is_some());
        assert!(entry(&remote, "/", "x").is_some());
    }

    #[test]
    fn test_local_only_modification_uploads() {
        let mut local = DirSnapshot::new();
        let mut remote = DirSnapshot::new();
        let mut base = DirSnapshot::new();
        with(&mut base, "/", item("c.txt", 3, 300));
        with(&mut local, "/", item("c.txt", 4, 400));
        with(&mut remote, "/", item("c.txt", 3, 300));

        let ins = visited(&[("/", &["c.txt"])]);
        let queue = merge_snapshots(&mut local, &mut remote, &mut base, &ins);

        assert_eq!(queue.l_new, vec![EntryKey::new("/", "c.txt")]);
        assert!(queue.r_new.is_empty());
        assert_eq!(base["/"]["c.txt"], item("c.txt", 4, 400));
    }

    #[test]
    fn test_remote_deletion_propagates() {
        let mut local = DirSnapshot::new();
        let mut remote = DirSnapshot::new();
        let mut base = DirSnapshot::new();
        with(&mut base, "/", item("d.txt", 8, 800));
        with(&mut local, "/", item("d.txt", 8, 800));
        remote.insert("/".to_string(), PathFile::default());

        let ins = visited(&[("/", &["d.txt"])]);
        let queue = merge_snapshots(&mut local, &mut remote, &mut base, &ins);

        assert_eq!(queue.r_del, vec![item("d.txt", 8, 800)]);
        assert!(queue.l_del.is_empty());
        assert!(entry(&base, "/", "d.txt").is_none());
        assert!(entry(&local, "/", "d.txt").is_none());
        assert!(entry(&remote, "/", "d.txt").is_none());
    }

    #[test]
    fn test_local_deletion_propagates() {
        let mut local = DirSnapshot::new();
        let mut remote = DirSnapshot::new();
        let mut base = DirSnapshot::new();
        with(&mut base, "/", item("d.txt", 8, 800));
        with(&mut remote, "/", item("d.txt", 8, 800));
        local.insert("/".to_string(), PathFile::default());

        let ins = visited(&[("/", &["d.txt"])]);
        let queue = merge_snapshots(&mut local, &mut remote, &mut base, &ins);

        assert_eq!(queue.l_del, vec![item("d.txt", 8, 800)]);
        assert!(queue.r_del.is_empty());
        assert!(entry(&base, "/", "d.txt").is_none());
    }

    #[test]
    fn test_gone_on_both_sides_drops_base_entry() {
        let mut local = DirSnapshot::new();
        let mut remote = DirSnapshot::new();
        let mut base = DirSnapshot::new();
        with(&mut base, "/", item("e.txt", 1, 100));
        local.insert("/".to_string(), PathFile::default());
        remote.insert("/".to_string(), PathFile::default());

        let ins = visited(&[("/", &["e.txt"])]);
        let queue = merge_snapshots(&mut local, &mut remote, &mut base, &ins);

        assert!(queue.is_empty());
        assert!(entry(&base, "/", "e.txt").is_none());
    }

    #[test]
    fn test_orphan_sweep_clears_unvisited_directory() {
        let mut local = DirSnapshot::new();
        let mut remote = DirSnapshot::new();
        let mut base = DirSnapshot::new();
        with(&mut base, "/sub", item("sub/e.txt", 6, 600));
        with(&mut local, "/sub", item("sub/e.txt", 6, 600));
        with(&mut remote, "/sub", item("sub/e.txt", 6, 600));

        // only the root was visited this pass
        let ins = visited(&[("/", &[])]);
        let queue = merge_snapshots(&mut local, &mut remote, &mut base, &ins);

        assert_eq!(queue.l_del.len(), 1);
        assert_eq!(queue.r_del.len(), 1);
        assert_eq!(queue.l_del[0].name, "sub/e.txt");
        assert_eq!(queue.r_del[0].name, "sub/e.txt");
        assert!(!base.contains_key("/sub"));
        assert!(!local.contains_key("/sub"));
        assert!(!remote.contains_key("/sub"));
    }

    #[test]
    fn test_pass_is_idempotent_without_changes() {
        let mut local = DirSnapshot::new();
        let mut remote = DirSnapshot::new();
        let mut base = DirSnapshot::new();
        with(&mut remote, "/", item("a.txt", 10, 1000));
        local.insert("/".to_string(), PathFile::default());

        let ins = visited(&[("/", &["a.txt"])]);
        let first = merge_snapshots(&mut local, &mut remote, &mut base, &ins);
        assert_eq!(first.len(), 1);

        // after the download completes the local walk observes the same file
        with(&mut local, "/", item("a.txt", 10, 1000));

        // nothing changed, so the next pass records a visit with no names
        let ins = visited(&[("/", &[])]);
        let second = merge_snapshots(&mut local, &mut remote, &mut base, &ins);
        assert!(second.is_empty());
    }
}
