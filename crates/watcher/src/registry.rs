//! Entry registry
//!
//! Flat table of watched paths keyed by canonical path. Parent/child links
//! are keys: a NonExistent entry is listed in its lexical parent's
//! `sub_entries`, so a `BTreeMap` walk always visits a parent before the
//! entries hanging below it.

use crate::backend::BackendHandle;
use crate::client::Client;
use dirwatch_core::{Method, Snapshot, WatcherId};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryStatus {
    Normal,
    /// Path does not exist yet; kept so its creation can be noticed
    NonExistent,
}

/// One watched filesystem path
#[derive(Debug)]
pub(crate) struct Entry {
    pub path: PathBuf,
    pub is_dir: bool,
    pub status: EntryStatus,
    /// Backend servicing this entry (None until one is chosen)
    pub mode: Option<Method>,
    pub snapshot: Option<Snapshot>,
    pub poll_interval: Duration,
    pub next_poll: Instant,
    /// A change was signalled but not yet scanned
    pub dirty: bool,
    /// A backend reported a modification of the entry itself
    pub signalled: bool,
    /// NonExistent children waiting to appear
    pub sub_entries: BTreeSet<PathBuf>,
    pub handle: Option<BackendHandle>,
    pub clients: SmallVec<[Client; 2]>,
    /// Lives on NFS/SMB
    pub network: bool,
}

impl Entry {
    pub fn new(path: PathBuf, is_dir: bool, snapshot: Option<Snapshot>, now: Instant) -> Self {
        let status = if snapshot.is_some() {
            EntryStatus::Normal
        } else {
            EntryStatus::NonExistent
        };
        Self {
            path,
            is_dir,
            status,
            mode: None,
            snapshot,
            poll_interval: Duration::ZERO,
            next_poll: now,
            dirty: false,
            signalled: false,
            sub_entries: BTreeSet::new(),
            handle: None,
            clients: SmallVec::new(),
            network: false,
        }
    }

    pub fn exists(&self) -> bool {
        self.status == EntryStatus::Normal
    }

    /// An entry is kept while it has a client or a sub-entry
    pub fn is_unused(&self) -> bool {
        self.clients.is_empty() && self.sub_entries.is_empty()
    }

    pub fn client(&self, watcher: WatcherId) -> Option<&Client> {
        self.clients.iter().find(|c| c.watcher == watcher)
    }

    pub fn client_mut(&mut self, watcher: WatcherId) -> Option<&mut Client> {
        self.clients.iter_mut().find(|c| c.watcher == watcher)
    }

    /// Drop clients that are neither registered nor derived any more
    pub fn prune_clients(&mut self) {
        self.clients.retain(|c| c.is_alive());
    }

    /// Polled by the scheduler rather than notified
    pub fn is_polled(&self) -> bool {
        self.mode == Some(Method::Stat)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: BTreeMap<PathBuf, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Entry> {
        self.entries.get_mut(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn insert(&mut self, entry: Entry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn remove(&mut self, path: &Path) -> Option<Entry> {
        self.entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.values_mut()
    }

    /// First dirty entry sorting after `after` (or the first overall)
    pub fn next_dirty(&self, after: Option<&Path>) -> Option<PathBuf> {
        let lower = match after {
            Some(path) => Bound::Excluded(path),
            None => Bound::Unbounded,
        };
        self.entries
            .range::<Path, _>((lower, Bound::Unbounded))
            .find(|(_, entry)| entry.dirty)
            .map(|(path, _)| path.clone())
    }

    /// Link `child` below its lexical parent entry
    pub fn link_sub_entry(&mut self, parent: &Path, child: &Path) {
        if let Some(entry) = self.entries.get_mut(parent) {
            entry.sub_entries.insert(child.to_path_buf());
        }
    }

    /// Unlink `child` from its parent; true if the parent is now unused
    pub fn unlink_sub_entry(&mut self, child: &Path) -> bool {
        let Some(parent) = child.parent() else {
            return false;
        };
        match self.entries.get_mut(parent) {
            Some(entry) => {
                entry.sub_entries.remove(child);
                entry.is_unused()
            }
            None => false,
        }
    }

    /// Registered ancestors of `path`, nearest first
    pub fn ancestors<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a Entry> + 'a {
        path.ancestors()
            .skip(1)
            .filter_map(move |ancestor| self.entries.get(ancestor))
    }

    /// Entries carrying a client of `watcher`
    pub fn paths_with_client(&self, watcher: WatcherId) -> Vec<PathBuf> {
        self.entries
            .values()
            .filter(|entry| entry.client(watcher).is_some())
            .map(|entry| entry.path.clone())
            .collect()
    }
}
