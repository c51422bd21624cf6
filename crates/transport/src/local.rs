//! Local filesystem endpoint

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use filetime::FileTime;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use driftsync_core::{Directory, FileAttrs, FileItem, FileKind, SyncError};

use crate::{record_error, Endpoint, ErrorSlot};

/// Adapter for the host filesystem side of the watcher
pub struct LocalEndpoint {
    root: String,
    errors: ErrorSlot,
}

impl LocalEndpoint {
    #[must_use]
    pub fn new(root: impl Into<String>, errors: ErrorSlot) -> Self {
        Self {
            root: root.into(),
            errors,
        }
    }

    fn fail(&self, err: &std::io::Error, path: &str) -> SyncError {
        record_error(&self.errors, SyncError::local(err, path))
    }
}

fn attrs_of(md: &Metadata) -> FileAttrs {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt as _;
        FileAttrs {
            size: md.size(),
            mtime: md.mtime().clamp(0, i64::from(u32::MAX)) as u32,
            atime: md.atime().clamp(0, i64::from(u32::MAX)) as u32,
            uid: Some(md.uid()),
            gid: Some(md.gid()),
            permissions: Some(md.mode()),
        }
    }
    #[cfg(not(unix))]
    {
        use std::time::UNIX_EPOCH;
        let secs = |t: std::io::Result<std::time::SystemTime>| {
            t.ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs().min(u64::from(u32::MAX)) as u32)
        };
        let type_bits = if md.is_dir() { 0o040_000 } else { 0o100_000 };
        FileAttrs {
            size: md.len(),
            mtime: secs(md.modified()),
            atime: secs(md.accessed()),
            uid: None,
            gid: None,
            permissions: Some(type_bits | 0o644),
        }
    }
}

fn kind_of(md: &Metadata, attrs: &FileAttrs) -> FileKind {
    if md.file_type().is_symlink() {
        return FileKind::Symlink;
    }
    FileKind::from_mode(attrs.permissions.unwrap_or(0))
}

fn apply_times(path: &str, attrs: &FileAttrs) -> std::io::Result<()> {
    filetime::set_file_times(
        path,
        FileTime::from_unix_time(i64::from(attrs.atime), 0),
        FileTime::from_unix_time(i64::from(attrs.mtime), 0),
    )
}

#[cfg(unix)]
fn apply_mode(path: &str, attrs: &FileAttrs) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(attrs.perm_bits()))
}

#[cfg(not(unix))]
fn apply_mode(_path: &str, _attrs: &FileAttrs) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl Endpoint for LocalEndpoint {
    fn root(&self) -> &str {
        &self.root
    }

    async fn list_dir(&mut self, dir: &Directory) -> Result<Vec<FileItem>, SyncError> {
        let entries = std::fs::read_dir(&dir.abs).map_err(|e| self.fail(&e, &dir.abs))?;

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| self.fail(&e, &dir.abs))?;
            let leaf = entry.file_name().to_string_lossy().into_owned();
            if leaf == "." || leaf == ".." {
                continue;
            }

            let entry_path = entry.path();
            let md = match std::fs::symlink_metadata(&entry_path) {
                Ok(md) => md,
                Err(e) => {
                    // the entry may vanish between readdir and lstat
                    debug!(path = %entry_path.display(), error = %e, "lstat failed, skipping entry");
                    continue;
                }
            };

            let attrs = attrs_of(&md);
            let kind = kind_of(&md, &attrs);
            let name = if dir.rela.is_empty() {
                leaf
            } else {
                format!("{}/{leaf}", dir.rela)
            };
            items.push(FileItem { name, kind, attrs });
        }

        Ok(items)
    }

    async fn stat(&mut self, path: &str) -> Result<FileAttrs, SyncError> {
        let md = std::fs::symlink_metadata(path).map_err(|e| self.fail(&e, path))?;
        Ok(attrs_of(&md))
    }

    async fn set_stat(&mut self, path: &str, attrs: &FileAttrs) -> Result<(), SyncError> {
        apply_times(path, attrs).map_err(|e| self.fail(&e, path))?;
        apply_mode(path, attrs).map_err(|e| self.fail(&e, path))
    }

    async fn open_read(
        &mut self,
        path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, SyncError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| self.fail(&e, path))?;
        Ok(Box::new(file))
    }

    async fn open_write(
        &mut self,
        path: &str,
        perm: u32,
    ) -> Result<Box<dyn AsyncWrite + Send + Unpin>, SyncError> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            options.mode(perm);
        }
        #[cfg(not(unix))]
        let _ = perm;

        let file = options.open(path).await.map_err(|e| self.fail(&e, path))?;
        Ok(Box::new(file))
    }

    async fn finish_write(&mut self, path: &str, attrs: &FileAttrs) -> Result<(), SyncError> {
        self.set_stat(path, attrs).await
    }

    async fn mkdir(&mut self, path: &str, attrs: &FileAttrs) -> Result<(), SyncError> {
        match std::fs::metadata(path) {
            Ok(md) if md.is_dir() => {
                // already there; refresh times to match the source side
                apply_times(path, attrs).map_err(|e| self.fail(&e, path))
            }
            Ok(_) => Err(record_error(
                &self.errors,
                SyncError::custom(-1, "path exists but is not a directory").with_path(path),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                std::fs::create_dir_all(path).map_err(|e| self.fail(&e, path))?;
                apply_mode(path, attrs).map_err(|e| self.fail(&e, path))?;
                apply_times(path, attrs).map_err(|e| self.fail(&e, path))
            }
            Err(e) => Err(self.fail(&e, path)),
        }
    }

    async fn remove_file(&mut self, path: &str) -> Result<(), SyncError> {
        std::fs::remove_file(path).map_err(|e| self.fail(&e, path))
    }

    async fn remove_dir_all(&mut self, path: &str) -> Result<(), SyncError> {
        match std::fs::symlink_metadata(path) {
            Ok(md) if md.is_dir() => std::fs::remove_dir_all(path).map_err(|e| self.fail(&e, path)),
            // nothing to remove, or not a directory
            _ => Ok(()),
        }
    }

    async fn read_link(&mut self, path: &str) -> Result<String, SyncError> {
        let target = std::fs::read_link(path).map_err(|e| self.fail(&e, path))?;
        Ok(target.to_string_lossy().into_owned())
    }

    #[cfg(unix)]
    async fn make_symlink(
        &mut self,
        path: &str,
        target: &str,
        attrs: &FileAttrs,
    ) -> Result<(), SyncError> {
        if let Ok(md) = std::fs::symlink_metadata(path) {
            if md.file_type().is_symlink() {
                std::fs::remove_file(path).map_err(|e| self.fail(&e, path))?;
            }
        }
        std::os::unix::fs::symlink(Path::new(target), Path::new(path))
            .map_err(|e| self.fail(&e, path))?;

        // stamp the link itself, not its target, so the next walk sees the
        // source's mtime
        filetime::set_symlink_file_times(
            path,
            FileTime::from_unix_time(i64::from(attrs.atime), 0),
            FileTime::from_unix_time(i64::from(attrs.mtime), 0),
        )
        .map_err(|e| self.fail(&e, path))
    }

    #[cfg(not(unix))]
    async fn make_symlink(
        &mut self,
        path: &str,
        _target: &str,
        _attrs: &FileAttrs,
    ) -> Result<(), SyncError> {
        Err(record_error(
            &self.errors,
            SyncError::custom(-8, "symlinks are not supported on this platform").with_path(path),
        ))
    }
}
