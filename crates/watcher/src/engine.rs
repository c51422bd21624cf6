//! One reconciliation pass: walk, diff, dispatch
//!
//! The dispatch order is a contract: local-delete, remote-delete, download,
//! upload. Deletions reclaim namespace before anything is created, and the
//! remote-wins bias applies downloads before uploads.

use std::time::Duration;

use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::time::Instant;
use tracing::{debug, warn};

use driftsync_core::{
    merge_snapshots, snap_key, FileItem, FileKind, Ins, SyncError, SyncQueue, TransferKind,
    WatchEvent,
};
use driftsync_transport::{abs_path, Endpoint, TRANSFER_BUF_SIZE};

use crate::context::Worker;
use crate::walk::walk_side;

/// Run one pass: walk both sides, merge the snapshots, dispatch the queue.
pub(crate) async fn run_pass(w: &mut Worker) {
    let mut ins = Ins::new();

    if let Err(err) = walk_side(
        w.local.as_mut(),
        &mut w.state.local_dirs,
        &mut w.state.local_snap,
        &mut ins,
        None,
        &w.stop,
    )
    .await
    {
        warn!(error = %err, "local walk truncated");
    }

    if !w.is_stopped() {
        if let Err(err) = walk_side(
            w.remote.as_mut(),
            &mut w.state.remote_dirs,
            &mut w.state.remote_snap,
            &mut ins,
            Some(&mut w.state.err_count),
            &w.stop,
        )
        .await
        {
            warn!(error = %err, "remote walk truncated");
        }
    }

    let queue = merge_snapshots(
        &mut w.state.local_snap,
        &mut w.state.remote_snap,
        &mut w.state.base_snap,
        &ins,
    );
    if !queue.is_empty() {
        debug!(operations = queue.len(), "dispatching queue");
    }

    dispatch(w, queue).await;
}

/// Drain the queue in contract order, pairing transfer events and emitting
/// an error event for every failed operation. Snapshot mutations made by
/// the diff are not rolled back when the stop flag cuts the drain short.
async fn dispatch(w: &mut Worker, queue: SyncQueue) {
    // unsupported shadowing pairs are reported and otherwise left alone
    for item in queue.shadowed {
        if w.is_stopped() {
            return;
        }
        w.emit_error(
            SyncError::custom(-1, "path is a directory on one side and not on the other")
                .with_path(item.name.as_str()),
        )
        .await;
    }

    // deletions observed locally apply to the remote side
    for item in queue.l_del {
        if w.is_stopped() {
            return;
        }
        let abs = abs_path(w.remote.root(), &item.name);
        let result = if item.kind.is_dir() {
            let key = snap_key(&item.name);
            w.state.local_dirs.remove(&key);
            w.state.remote_dirs.remove(&key);
            w.remote.remove_dir_all(&abs).await
        } else {
            w.remote.remove_file(&abs).await
        };
        if let Err(err) = result {
            w.emit_error(err.with_path(item.name.as_str())).await;
        }
        w.emit(WatchEvent::file(item, TransferKind::LocalDelete, true))
            .await;
    }

    // deletions observed remotely apply to the local side
    for item in queue.r_del {
        if w.is_stopped() {
            return;
        }
        let abs = abs_path(w.local.root(), &item.name);
        let result = if item.kind.is_dir() {
            let key = snap_key(&item.name);
            w.state.local_dirs.remove(&key);
            w.state.remote_dirs.remove(&key);
            w.local.remove_dir_all(&abs).await
        } else {
            w.local.remove_file(&abs).await
        };
        if let Err(err) = result {
            w.emit_error(err.with_path(item.name.as_str())).await;
        }
        w.emit(WatchEvent::file(item, TransferKind::RemoteDelete, true))
            .await;
    }

    let poll = Duration::from_millis(w.config.stable_poll_ms);
    let bound = Duration::from_secs(w.config.timeout_sec);

    // downloads
    for key in queue.r_new {
        if w.is_stopped() {
            return;
        }
        let Some(mut item) = lookup(w, &key.dir, &key.name) else {
            continue;
        };

        let result = match item.kind {
            FileKind::Dir => {
                let abs = abs_path(w.local.root(), &item.name);
                w.local.mkdir(&abs, &item.attrs).await
            }
            FileKind::Symlink => {
                if cfg!(unix) {
                    copy_symlink(w.remote.as_mut(), w.local.as_mut(), &item).await
                } else {
                    // no symlink support: fall back to a plain file copy
                    transfer_file(w.remote.as_mut(), w.local.as_mut(), &mut item, poll, bound)
                        .await
                }
            }
            FileKind::Regular => {
                w.emit(WatchEvent::file(item.clone(), TransferKind::Download, false))
                    .await;
                transfer_file(w.remote.as_mut(), w.local.as_mut(), &mut item, poll, bound).await
            }
            _ => Ok(()),
        };

        match result {
            Ok(()) => settle(w, &key.dir, &key.name, &item),
            Err(err) => w.emit_error(err.with_path(item.name.as_str())).await,
        }
        w.emit(WatchEvent::file(item, TransferKind::Download, true))
            .await;
    }

    // uploads
    for key in queue.l_new {
        if w.is_stopped() {
            return;
        }
        let Some(mut item) = lookup(w, &key.dir, &key.name) else {
            continue;
        };

        let result = match item.kind {
            FileKind::Dir => {
                let abs = abs_path(w.remote.root(), &item.name);
                w.remote.mkdir(&abs, &item.attrs).await
            }
            FileKind::Regular => {
                w.emit(WatchEvent::file(item.clone(), TransferKind::Upload, false))
                    .await;
                transfer_file(w.local.as_mut(), w.remote.as_mut(), &mut item, poll, bound).await
            }
            _ => Ok(()),
        };

        match result {
            Ok(()) => settle(w, &key.dir, &key.name, &item),
            Err(err) => w.emit_error(err.with_path(item.name.as_str())).await,
        }
        w.emit(WatchEvent::file(item, TransferKind::Upload, true))
            .await;
    }
}

fn lookup(w: &Worker, dir: &str, name: &str) -> Option<FileItem> {
    w.state
        .base_snap
        .get(dir)
        .and_then(|contents| contents.get(name))
        .cloned()
}

/// Write the settled attributes back into the base snapshot; the stability
/// wait may have observed a newer size or mtime than the walk did.
fn settle(w: &mut Worker, dir: &str, name: &str, item: &FileItem) {
    if let Some(slot) = w
        .state
        .base_snap
        .get_mut(dir)
        .and_then(|contents| contents.get_mut(name))
    {
        slot.attrs = item.attrs;
    }
}

/// Copy one regular file from `src` to `dst`, then stamp the destination
/// with the source attributes. Each chunk operation is bounded by the
/// session timeout.
async fn transfer_file(
    src: &mut dyn Endpoint,
    dst: &mut dyn Endpoint,
    item: &mut FileItem,
    poll: Duration,
    bound: Duration,
) -> Result<(), SyncError> {
    let src_abs = abs_path(src.root(), &item.name);
    let dst_abs = abs_path(dst.root(), &item.name);

    stability_wait(src, &src_abs, item, poll, bound).await?;

    let mut reader = src.open_read(&src_abs).await?;
    let mut writer = dst.open_write(&dst_abs, item.attrs.perm_bits()).await?;

    let mut buf = vec![0u8; TRANSFER_BUF_SIZE];
    loop {
        let n = tokio::time::timeout(bound, reader.read(&mut buf))
            .await
            .map_err(|_| SyncError::session("transfer read timed out").with_path(src_abs.as_str()))?
            .map_err(|e| SyncError::local(&e, src_abs.as_str()))?;
        if n == 0 {
            break;
        }
        tokio::time::timeout(bound, writer.write_all(&buf[..n]))
            .await
            .map_err(|_| {
                SyncError::session("transfer write timed out").with_path(dst_abs.as_str())
            })?
            .map_err(|e| SyncError::local(&e, dst_abs.as_str()))?;
    }

    tokio::time::timeout(bound, writer.shutdown())
        .await
        .map_err(|_| SyncError::session("transfer close timed out").with_path(dst_abs.as_str()))?
        .map_err(|e| SyncError::local(&e, dst_abs.as_str()))?;
    drop(writer);
    drop(reader);

    // times and permissions go on after the handle is closed
    dst.finish_write(&dst_abs, &item.attrs).await
}

/// Sample the source size until two consecutive observations agree, so a
/// file still being written is not transferred mid-stream. Bounded: on
/// expiry the transfer proceeds with the last observation.
async fn stability_wait(
    src: &mut dyn Endpoint,
    abs: &str,
    item: &mut FileItem,
    poll: Duration,
    bound: Duration,
) -> Result<(), SyncError> {
    let started = Instant::now();
    loop {
        tokio::time::sleep(poll).await;
        let now = src.stat(abs).await?;
        let stable = now.size == item.attrs.size;
        item.attrs = now;
        if stable {
            return Ok(());
        }
        if started.elapsed() >= bound {
            warn!(path = abs, "size did not settle, transferring anyway");
            return Ok(());
        }
    }
}

/// Re-point the destination symlink at the source's target, replacing an
/// existing link.
async fn copy_symlink(
    src: &mut dyn Endpoint,
    dst: &mut dyn Endpoint,
    item: &FileItem,
) -> Result<(), SyncError> {
    let src_abs = abs_path(src.root(), &item.name);
    let dst_abs = abs_path(dst.root(), &item.name);

    let target = src.read_link(&src_abs).await?;
    dst.make_symlink(&dst_abs, &target, &item.attrs).await
}
