//! Scan & dispatch scheduler
//!
//! One pass ([`Engine::tick`]):
//! 1. polled entries whose countdown elapsed are marked dirty
//! 2. backend queues are drained and their signals applied
//! 3. dirtiness is propagated (down to waiting sub-entries, up to watched
//!    ancestors)
//! 4. dirty entries are re-stat'ed in path order, promoting and demoting
//!    entries as they appear and vanish
//! 5. the pass's change records are emitted
//!
//! Entries that become unused during the pass are only queued for removal.

use crate::backend::{stat, RawEvent, Signal};
use crate::engine::Engine;
use crate::registry::EntryStatus;
use dirwatch_core::{ChangeSet, Method, Snapshot};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, trace, warn};

impl Engine {
    /// Run one pass now
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Run one pass as if the clock read `now`
    pub fn tick_at(&mut self, now: Instant) {
        if self.stopped {
            trace!("Engine stopped, skipping tick");
            return;
        }
        self.delay_remove = true;

        for entry in self.registry.values_mut() {
            if entry.is_polled() && now >= entry.next_poll {
                entry.dirty = true;
                entry.next_poll = now + entry.poll_interval;
            }
        }

        let mut raw = Vec::new();
        for method in self.drivers.drain(&mut raw) {
            self.backend_lost(method);
        }
        for event in raw {
            self.apply_signal(event);
        }

        self.propagate_dirty();

        let mut cursor: Option<PathBuf> = None;
        while let Some(path) = self.registry.next_dirty(cursor.as_deref()) {
            self.scan_entry(&path, now);
            cursor = Some(path);
        }

        self.emit_changes();
        self.delay_remove = false;
        self.flush();
    }

    /// Translate one driver notification into dirty marks and change records
    fn apply_signal(&mut self, event: RawEvent) {
        let (path, signal) = match event {
            RawEvent::Overflow { method } => {
                warn!("{} backend lost events, rescanning everything", method);
                self.rescan_all();
                return;
            }
            RawEvent::Entry { path, signal } => (path, signal),
        };
        trace!("{}: {:?}", path.display(), signal);

        match signal {
            Signal::Changed => self.mark(&path, true),
            Signal::Deleted | Signal::Rescan => self.mark(&path, false),
            Signal::Released => {
                self.release_handle(&path);
                self.mark(&path, false);
            }
            Signal::ChildCreated { name, is_dir } => {
                self.apply_child(&path, &path.join(name), ChangeSet::CREATED, is_dir)
            }
            Signal::ChildDeleted { name, is_dir } => {
                self.apply_child(&path, &path.join(name), ChangeSet::DELETED, is_dir)
            }
            Signal::ChildChanged { name } => {
                let child = path.join(name);
                if self.noise.is_noise(&child, false) {
                    return;
                }
                if self.registry.contains(&child) {
                    self.mark(&child, true);
                } else {
                    self.changes.record(child, ChangeSet::CHANGED, false);
                }
            }
        }
    }

    /// A child appeared in or vanished from a watched directory
    fn apply_child(&mut self, dir: &Path, child: &Path, kinds: ChangeSet, is_dir: bool) {
        if self.noise.is_noise(child, is_dir) {
            trace!("Ignoring noisy {}", child.display());
            return;
        }

        // The listing changed, so the directory itself did too
        self.mark(dir, false);

        // An entry of its own decides by stat; otherwise trust the backend
        if self.registry.contains(child) {
            self.mark(child, false);
        } else {
            self.changes.record(child.to_path_buf(), kinds, is_dir);
        }
    }

    fn mark(&mut self, path: &Path, signalled: bool) {
        if let Some(entry) = self.registry.get_mut(path) {
            entry.dirty = true;
            entry.signalled |= signalled;
        }
    }

    /// Dirty entries pull in their waiting sub-entries and watched ancestors
    fn propagate_dirty(&mut self) {
        let dirty: Vec<PathBuf> = self
            .registry
            .values()
            .filter(|e| e.dirty)
            .map(|e| e.path.clone())
            .collect();

        for path in dirty {
            let subs: Vec<PathBuf> = self
                .registry
                .get(&path)
                .map(|e| e.sub_entries.iter().cloned().collect())
                .unwrap_or_default();
            for sub in subs {
                self.mark(&sub, false);
            }

            for ancestor in path.ancestors().skip(1) {
                if let Some(entry) = self.registry.get_mut(ancestor) {
                    if !entry.clients.is_empty() {
                        entry.dirty = true;
                    }
                }
            }
        }
    }

    /// Re-stat one entry and record what changed
    fn scan_entry(&mut self, path: &Path, now: Instant) {
        let Some(entry) = self.registry.get_mut(path) else {
            return;
        };
        entry.dirty = false;
        if entry.is_unused() {
            // Awaiting delayed removal
            return;
        }
        let signalled = std::mem::take(&mut entry.signalled);
        let old = entry.snapshot;
        let new = Snapshot::stat(path);
        let was_dir = entry.is_dir;

        let transition = match entry.status {
            // A stale snapshot never survives demotion
            EntryStatus::NonExistent => stat::classify(None, new.as_ref()),
            EntryStatus::Normal => stat::classify(old.as_ref(), new.as_ref()),
        };

        match (transition, new) {
            (stat::Transition::Appeared, Some(snapshot)) => {
                self.promote(path, snapshot, now);
            }
            (stat::Transition::Vanished, _) => {
                self.demote(path, now);
            }
            (stat::Transition::Replaced, Some(snapshot)) => {
                debug!("{} was replaced", path.display());
                if let Some(entry) = self.registry.get_mut(path) {
                    entry.snapshot = Some(snapshot);
                    entry.is_dir = snapshot.is_dir;
                }
                self.release_handle(path);
                self.select_backend(path);
            }
            (stat::Transition::Modified, Some(snapshot)) => {
                if let Some(entry) = self.registry.get_mut(path) {
                    entry.snapshot = Some(snapshot);
                }
            }
            _ => {}
        }

        let mut kinds = transition.kinds();
        if kinds.is_empty() && signalled && new.is_some() {
            kinds = ChangeSet::CHANGED;
        }

        let Some(entry) = self.registry.get(path) else {
            return;
        };
        let is_dir = if entry.exists() { entry.is_dir } else { was_dir };
        let needs_backend = !entry.is_unused()
            && match entry.status {
                EntryStatus::Normal => entry.handle.is_none(),
                EntryStatus::NonExistent => entry.mode.is_none(),
            };
        let expand = entry.exists() && entry.is_dir && !kinds.is_empty();

        if !kinds.is_empty() {
            trace!("{} {:?}", path.display(), kinds);
            self.changes.record(path.to_path_buf(), kinds, is_dir);
        }
        if needs_backend {
            self.select_backend(path);
        }
        if expand {
            self.expand_clients(path, now);
        }
    }

    /// A NonExistent entry now exists
    fn promote(&mut self, path: &Path, snapshot: Snapshot, now: Instant) {
        let subs: Vec<PathBuf> = match self.registry.get_mut(path) {
            Some(entry) => {
                entry.status = EntryStatus::Normal;
                entry.snapshot = Some(snapshot);
                entry.is_dir = snapshot.is_dir;
                entry.sub_entries.iter().cloned().collect()
            }
            None => return,
        };
        debug!("{} now exists", path.display());

        if self.registry.unlink_sub_entry(path) {
            if let Some(parent) = path.parent() {
                self.remove_if_unused(parent);
            }
        }

        self.release_handle(path);
        self.select_backend(path);
        self.refresh_interval(path, now);

        // Sort after `path`, so they are scanned later in this pass
        for sub in subs {
            self.mark(&sub, false);
        }
    }

    /// A Normal entry vanished
    ///
    /// Clients that only exist through a recursive registration are
    /// withdrawn; the directory re-registers them if the path comes back.
    /// An entry left without users is removed instead of waiting for its
    /// creation.
    fn demote(&mut self, path: &Path, now: Instant) {
        self.release_handle(path);
        let unused = match self.registry.get_mut(path) {
            Some(entry) => {
                entry.status = EntryStatus::NonExistent;
                entry.snapshot = None;
                entry.mode = None;
                entry.clients.retain(|c| c.count() > 0);
                entry.is_unused()
            }
            None => return,
        };
        debug!("{} no longer exists", path.display());

        if unused {
            self.remove_if_unused(path);
            return;
        }
        self.refresh_interval(path, now);
        self.select_backend(path);
        self.attach_to_parent(path, now);
    }

    /// A driver failed for good; re-home everything it serviced
    fn backend_lost(&mut self, method: Method) {
        let mut moved = 0;
        for entry in self.registry.values_mut() {
            if entry.mode != Some(method) {
                continue;
            }
            // The driver is gone along with its handles
            entry.handle = None;
            entry.mode = None;
            entry.dirty = true;
            moved += 1;
        }
        warn!("{} backend lost, re-evaluating {} entries", method, moved);
    }
}
