//! Client multiplexer
//!
//! A [`Client`] is one watcher handle's registration against one entry.
//! Several handles share an entry (and its single OS watch); each keeps its
//! own mode, suspension state and pending changes.

use crate::coalesce::PendingChanges;
use dirwatch_core::{ChangeKind, ChangeSet, WatchModes, WatcherId};
use smallvec::SmallVec;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a changed path sits relative to the entry a client is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Relation {
    /// The entry's own path
    Own,
    /// A direct child of the entry
    Child,
    /// Two or more levels below the entry
    Descendant,
}

impl Relation {
    /// Relation of `path` to `entry`, if it is the entry or below it
    pub fn of(entry: &Path, path: &Path) -> Option<Relation> {
        let rest = path.strip_prefix(entry).ok()?;
        match rest.components().count() {
            0 => Some(Relation::Own),
            1 => Some(Relation::Child),
            _ => Some(Relation::Descendant),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Client {
    pub watcher: WatcherId,
    /// Explicit registrations of this path by this watcher, oldest first,
    /// each with the frequency hint it was made with
    registrations: SmallVec<[Option<Duration>; 2]>,
    pub modes: WatchModes,
    pub suspended: bool,
    /// Accumulated kinds for the entry itself while suspended
    pub pending: ChangeSet,
    /// Accumulated kinds for paths below the entry while suspended
    pub pending_children: PendingChanges,
    /// Hint inherited from the recursive registration
    pub derived_hint: Option<Duration>,
    /// Root of the recursive registration that created this client
    pub derived_from: Option<PathBuf>,
}

impl Client {
    pub fn new(watcher: WatcherId, modes: WatchModes, suspended: bool) -> Self {
        Self {
            watcher,
            registrations: SmallVec::new(),
            modes,
            suspended,
            pending: ChangeSet::empty(),
            pending_children: PendingChanges::new(),
            derived_hint: None,
            derived_from: None,
        }
    }

    pub fn count(&self) -> usize {
        self.registrations.len()
    }

    pub fn add_registration(&mut self, hint: Option<Duration>) {
        self.registrations.push(hint);
    }

    /// Drop the most recent registration; true while others remain
    pub fn drop_registration(&mut self) -> bool {
        self.registrations.pop();
        !self.registrations.is_empty()
    }

    /// Smallest hint among the live registrations
    pub fn interval_hint(&self) -> Option<Duration> {
        self.registrations
            .iter()
            .flatten()
            .chain(self.derived_hint.iter().filter(|_| self.derived_from.is_some()))
            .copied()
            .min()
    }

    /// A client lives while it is registered explicitly or on behalf of a root
    pub fn is_alive(&self) -> bool {
        !self.registrations.is_empty() || self.derived_from.is_some()
    }

    /// Whether a change at `relation` to this client's entry concerns it
    pub fn interested(&self, relation: Relation, is_dir: bool) -> bool {
        match relation {
            Relation::Own => true,
            Relation::Child if is_dir => self.modes.contains(WatchModes::SUB_DIRS),
            Relation::Child => self.modes.contains(WatchModes::FILES),
            Relation::Descendant if is_dir => self.modes.contains(WatchModes::SUB_DIRS),
            Relation::Descendant => self.modes.contains(WatchModes::SUB_DIRS | WatchModes::FILES),
        }
    }

    /// Remember a change while suspended
    pub fn accumulate(&mut self, relation: Relation, path: &Path, kinds: ChangeSet, is_dir: bool) {
        for kind in kinds.kinds() {
            match relation {
                Relation::Own => self.pending.accumulate(kind),
                _ => self.pending_children.accumulate(path, kind, is_dir),
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || !self.pending_children.is_empty()
    }

    /// Take everything accumulated: the entry's own kind, then children in
    /// the order they were first seen. One kind per path.
    pub fn take_pending(&mut self) -> (Option<ChangeKind>, Vec<(PathBuf, ChangeKind, bool)>) {
        let own = std::mem::take(&mut self.pending).most_severe();
        let children = self
            .pending_children
            .drain()
            .into_iter()
            .filter_map(|(path, pending)| {
                pending
                    .kinds
                    .most_severe()
                    .map(|kind| (path, kind, pending.is_dir))
            })
            .collect();
        (own, children)
    }

    pub fn clear_pending(&mut self) {
        self.pending = ChangeSet::empty();
        self.pending_children.clear();
    }
}

/// Effective poll interval: smallest hint among active clients
///
/// Clients without a hint ask for `default`. With no active client the
/// default applies.
pub(crate) fn effective_interval<'a>(
    clients: impl IntoIterator<Item = &'a Client>,
    default: Duration,
) -> Duration {
    clients
        .into_iter()
        .filter(|c| !c.suspended)
        .map(|c| c.interval_hint().unwrap_or(default))
        .min()
        .unwrap_or(default)
}
