//! Watcher identities and delivered events

use crate::kind::ChangeKind;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Identity of one logical watcher handle
///
/// The engine never owns the handle behind an id; it only routes events to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WatcherId(u64);

impl WatcherId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// A change delivered to one watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEvent {
    /// Watcher the event is addressed to
    pub watcher: WatcherId,
    /// Path that changed (the watched path or a child of it)
    pub path: PathBuf,
    /// Type of change
    pub kind: ChangeKind,
    /// Whether the path names a directory
    pub is_dir: bool,
}
