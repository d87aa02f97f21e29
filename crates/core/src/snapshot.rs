//! Metadata snapshots used to detect changes by comparison

use std::fs::Metadata;
use std::path::Path;
use std::time::SystemTime;

/// Last observed metadata of a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Modification time
    pub mtime: Option<SystemTime>,
    /// Status change time (seconds, nanoseconds)
    pub ctime: (i64, i64),
    /// Inode number (0 where the platform has none)
    pub ino: u64,
    /// Hard link count
    pub nlink: u64,
    /// Whether the path is a directory
    pub is_dir: bool,
}

impl Snapshot {
    /// Stat `path`, following symlinks
    ///
    /// Any failure (vanished mid-scan, permission denied) reads as absence.
    pub fn stat(path: &Path) -> Option<Self> {
        std::fs::metadata(path).ok().map(|meta| Self::from_metadata(&meta))
    }

    #[cfg(unix)]
    pub fn from_metadata(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            mtime: meta.modified().ok(),
            ctime: (meta.ctime(), meta.ctime_nsec()),
            ino: meta.ino(),
            nlink: meta.nlink(),
            is_dir: meta.is_dir(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            mtime: meta.modified().ok(),
            ctime: (0, 0),
            ino: 0,
            nlink: 1,
            is_dir: meta.is_dir(),
        }
    }

    /// True if `other` is a different file object at the same path
    pub fn inode_differs(&self, other: &Snapshot) -> bool {
        self.ino != other.ino
    }

    /// True if any tracked metadata moved
    pub fn metadata_differs(&self, other: &Snapshot) -> bool {
        self.mtime != other.mtime || self.ctime != other.ctime || self.nlink != other.nlink
    }
}
