//! Event emission
//!
//! Resolves the change records of a pass to the clients interested in them
//! and hands the resulting events to delivery sinks.

use crate::client::Relation;
use crate::engine::Engine;
use dirwatch_core::{WatchEvent, WatcherId};
use smallvec::SmallVec;
use std::path::PathBuf;
use tracing::{debug, trace};

impl Engine {
    /// Deliver (or, for suspended clients, accumulate) this pass's records
    ///
    /// A record reaches the clients of its own entry, the mode-matching
    /// clients of its parent, and the recursive clients of deeper
    /// ancestors. Each watcher sees a path at most once, through the
    /// nearest entry it is attached to.
    pub(crate) fn emit_changes(&mut self) {
        if self.changes.is_empty() {
            return;
        }
        trace!("Emitting {} change records", self.changes.len());

        for (path, pending) in self.changes.drain() {
            let mut recipients: SmallVec<[(PathBuf, WatcherId, Relation); 4]> = SmallVec::new();

            if let Some(entry) = self.registry.get(&path) {
                for client in &entry.clients {
                    recipients.push((path.clone(), client.watcher, Relation::Own));
                }
            }
            for ancestor in self.registry.ancestors(&path) {
                let Some(relation) = Relation::of(&ancestor.path, &path) else {
                    continue;
                };
                for client in &ancestor.clients {
                    if recipients.iter().any(|(_, w, _)| *w == client.watcher) {
                        continue;
                    }
                    if client.interested(relation, pending.is_dir) {
                        recipients.push((ancestor.path.clone(), client.watcher, relation));
                    }
                }
            }

            for (entry_path, watcher, relation) in recipients {
                let Some(client) = self
                    .registry
                    .get_mut(&entry_path)
                    .and_then(|e| e.client_mut(watcher))
                else {
                    continue;
                };

                if client.suspended {
                    client.accumulate(relation, &path, pending.kinds, pending.is_dir);
                    continue;
                }
                for kind in pending.kinds.kinds() {
                    self.outbox.push(WatchEvent {
                        watcher,
                        path: path.clone(),
                        kind,
                        is_dir: pending.is_dir,
                    });
                }
            }
        }
    }

    /// Hand queued events to their sinks
    ///
    /// Watchers whose receiving side is gone are detached afterwards.
    pub(crate) fn flush(&mut self) {
        let mut gone: SmallVec<[WatcherId; 2]> = SmallVec::new();

        for event in std::mem::take(&mut self.outbox) {
            let watcher = event.watcher;
            match self.sinks.get_mut(&watcher) {
                Some(sink) => {
                    if !sink.deliver(event) && !gone.contains(&watcher) {
                        gone.push(watcher);
                    }
                }
                None => trace!("No sink for {}, dropping event", watcher),
            }
        }

        for watcher in gone {
            debug!("{} disconnected, withdrawing its registrations", watcher);
            self.detach(watcher);
        }
    }
}
