//! Change kinds, accumulated change sets and watch modes

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of change delivered to a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Path content or metadata changed
    Changed,
    /// Path came into existence
    Created,
    /// Path vanished
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Changed => "changed",
            ChangeKind::Created => "created",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Set of change kinds observed for one path
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChangeSet: u8 {
        const CHANGED = 0b001;
        const CREATED = 0b010;
        const DELETED = 0b100;
    }
}

impl Default for ChangeSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<ChangeKind> for ChangeSet {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Changed => ChangeSet::CHANGED,
            ChangeKind::Created => ChangeSet::CREATED,
            ChangeKind::Deleted => ChangeSet::DELETED,
        }
    }
}

impl ChangeSet {
    /// Fold a kind into a suspended client's pending set.
    ///
    /// `Changed` accumulates; `Created` and `Deleted` replace whatever was
    /// pending, since the existence transition supersedes earlier history.
    pub fn accumulate(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::Changed => self.insert(ChangeSet::CHANGED),
            ChangeKind::Created | ChangeKind::Deleted => *self = kind.into(),
        }
    }

    /// Kinds in delivery order: Deleted, Created, Changed
    pub fn kinds(self) -> impl Iterator<Item = ChangeKind> {
        [
            (ChangeSet::DELETED, ChangeKind::Deleted),
            (ChangeSet::CREATED, ChangeKind::Created),
            (ChangeSet::CHANGED, ChangeKind::Changed),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, kind)| kind)
    }

    /// The single kind a flushed pending set is delivered as
    pub fn most_severe(self) -> Option<ChangeKind> {
        self.kinds().next()
    }
}

bitflags! {
    /// Which nested changes a directory registration is interested in
    ///
    /// The empty set is "directory only".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct WatchModes: u8 {
        /// Direct child files
        const FILES = 0b01;
        /// Nested directories, recursively
        const SUB_DIRS = 0b10;
    }
}

impl WatchModes {
    pub const DIR_ONLY: WatchModes = WatchModes::empty();
}

impl Default for WatchModes {
    fn default() -> Self {
        Self::DIR_ONLY
    }
}
