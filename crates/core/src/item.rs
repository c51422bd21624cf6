//! File items and the attribute record shared by both sides

use serde::{Deserialize, Serialize};

/// File type, derived from the S_IFMT nibble of a permission word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Regular,
    Dir,
    Symlink,
    Char,
    Block,
    Fifo,
    Socket,
    /// No usable type information (also used for the `.`/`..` sentinels)
    Invalid,
}

impl FileKind {
    /// Classify a permission word by its file-type bits
    #[must_use]
    pub fn from_mode(mode: u32) -> Self {
        match mode & 0o170_000 {
            0o100_000 => Self::Regular,
            0o040_000 => Self::Dir,
            0o120_000 => Self::Symlink,
            0o020_000 => Self::Char,
            0o060_000 => Self::Block,
            0o010_000 => Self::Fifo,
            0o140_000 => Self::Socket,
            _ => Self::Invalid,
        }
    }

    #[must_use]
    pub fn is_dir(self) -> bool {
        self == Self::Dir
    }

    #[must_use]
    pub fn is_regular(self) -> bool {
        self == Self::Regular
    }

    #[must_use]
    pub fn is_symlink(self) -> bool {
        self == Self::Symlink
    }
}

/// Attribute record for one file entry
///
/// The optional fields mirror the wire format: a server (or platform) that
/// does not report a field leaves it `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttrs {
    /// Size in bytes
    pub size: u64,
    /// Modification time, seconds since the epoch
    pub mtime: u32,
    /// Access time, seconds since the epoch
    pub atime: u32,
    /// Owner id
    pub uid: Option<u32>,
    /// Group id
    pub gid: Option<u32>,
    /// Full permission word including file-type bits
    pub permissions: Option<u32>,
}

impl FileAttrs {
    /// The POSIX permission bits, defaulting to `0o644` when unreported
    #[must_use]
    pub fn perm_bits(&self) -> u32 {
        self.permissions.map_or(0o644, |p| p & 0o777)
    }
}

/// A named entry discovered in a directory
///
/// `name` is always the path relative to the side's root, never a bare leaf,
/// so entries of nested directories stay unambiguous as snapshot keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileItem {
    pub name: String,
    pub kind: FileKind,
    pub attrs: FileAttrs,
}

impl FileItem {
    /// Two items are equivalent iff size and mtime agree; nothing else
    /// participates in the comparison.
    #[must_use]
    pub fn differs(&self, other: &Self) -> bool {
        self.attrs.size != other.attrs.size || self.attrs.mtime != other.attrs.mtime
    }

    /// Leaf component of the relative name
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(size: u64, mtime: u32) -> FileItem {
        FileItem {
            name: "a.txt".to_string(),
            kind: FileKind::Regular,
            attrs: FileAttrs {
                size,
                mtime,
                ..FileAttrs::default()
            },
        }
    }

    #[test]
    fn test_kind_from_mode() {
        assert_eq!(FileKind::from_mode(0o100_644), FileKind::Regular);
        assert_eq!(FileKind::from_mode(0o040_755), FileKind::Dir);
        assert_eq!(FileKind::from_mode(0o120_777), FileKind::Symlink);
        assert_eq!(FileKind::from_mode(0o010_600), FileKind::Fifo);
        assert_eq!(FileKind::from_mode(0), FileKind::Invalid);
    }

    #[test]
    fn test_equivalence_is_size_and_mtime_only() {
        let a = item(10, 1000);
        let mut b = item(10, 1000);
        b.attrs.uid = Some(42);
        b.attrs.permissions = Some(0o100_600);
        assert!(!a.differs(&b));

        let c = item(11, 1000);
        assert!(a.differs(&c));

        let d = item(10, 1001);
        assert!(a.differs(&d));
    }

    #[test]
    fn test_leaf_of_nested_name() {
        let mut it = item(1, 1);
        it.name = "sub/inner/file.txt".to_string();
        assert_eq!(it.leaf(), "file.txt");

        it.name = "top.txt".to_string();
        assert_eq!(it.leaf(), "top.txt");
    }
}
