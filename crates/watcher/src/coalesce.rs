//! Per-path change coalescing
//!
//! Bursts of raw notifications for one path collapse into a single record,
//! kept in first-seen order so deliveries follow the order things happened.

use ahash::AHashMap;
use dirwatch_core::{ChangeKind, ChangeSet};
use std::path::{Path, PathBuf};

/// Coalesced state of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pending {
    pub kinds: ChangeSet,
    pub is_dir: bool,
}

/// Ordered path -> change set buffer
#[derive(Debug, Default, Clone)]
pub(crate) struct PendingChanges {
    order: Vec<PathBuf>,
    changes: AHashMap<PathBuf, Pending>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `kinds` into the record for `path`
    pub fn record(&mut self, path: PathBuf, kinds: ChangeSet, is_dir: bool) {
        if kinds.is_empty() {
            return;
        }
        match self.changes.get_mut(&path) {
            Some(pending) => {
                pending.kinds |= kinds;
                pending.is_dir |= is_dir;
            }
            None => {
                self.order.push(path.clone());
                self.changes.insert(path, Pending { kinds, is_dir });
            }
        }
    }

    /// Fold one kind in with suspended-delivery semantics
    /// (see [`ChangeSet::accumulate`])
    pub fn accumulate(&mut self, path: &Path, kind: ChangeKind, is_dir: bool) {
        match self.changes.get_mut(path) {
            Some(pending) => {
                pending.kinds.accumulate(kind);
                pending.is_dir = is_dir;
            }
            None => {
                self.order.push(path.to_path_buf());
                self.changes.insert(
                    path.to_path_buf(),
                    Pending {
                        kinds: kind.into(),
                        is_dir,
                    },
                );
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, path: &Path) -> Option<&Pending> {
        self.changes.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.changes.clear();
    }

    /// Take every record in first-seen order
    pub fn drain(&mut self) -> Vec<(PathBuf, Pending)> {
        let mut changes = std::mem::take(&mut self.changes);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|path| changes.remove(&path).map(|pending| (path, pending)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_unions_kinds() {
        let mut buffer = PendingChanges::new();
        let path = PathBuf::from("/d/file.rs");

        buffer.record(path.clone(), ChangeSet::CHANGED, false);
        buffer.record(path.clone(), ChangeSet::CHANGED, false);
        buffer.record(path.clone(), ChangeSet::DELETED, false);

        assert_eq!(buffer.len(), 1);
        assert_eq!(
            buffer.get(&path).unwrap().kinds,
            ChangeSet::CHANGED | ChangeSet::DELETED
        );
    }

    #[test]
    fn test_drain_keeps_first_seen_order() {
        let mut buffer = PendingChanges::new();
        buffer.record(PathBuf::from("/d/b"), ChangeSet::CREATED, true);
        buffer.record(PathBuf::from("/d/a"), ChangeSet::CHANGED, false);
        buffer.record(PathBuf::from("/d/b"), ChangeSet::CHANGED, true);

        let drained = buffer.drain();
        let paths: Vec<_> = drained.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/d/b"), PathBuf::from("/d/a")]);
        assert!(drained[0].1.is_dir);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_set_is_ignored() {
        let mut buffer = PendingChanges::new();
        buffer.record(PathBuf::from("/d/a"), ChangeSet::empty(), false);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_accumulate_replaces_on_existence_change() {
        let mut buffer = PendingChanges::new();
        let path = Path::new("/d/a");
        buffer.accumulate(path, ChangeKind::Changed, false);
        buffer.accumulate(path, ChangeKind::Deleted, false);

        assert_eq!(buffer.get(path).unwrap().kinds, ChangeSet::DELETED);
    }
}
