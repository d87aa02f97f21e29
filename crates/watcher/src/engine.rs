//! The watch engine
//!
//! An explicitly owned, single-threaded value holding the entry registry,
//! the backend drivers and the delivery sinks of every attached watcher.
//! Nothing here blocks: the owner calls [`Engine::tick`] on a timer (see
//! [`DirWatch`](crate::DirWatch) for a tokio-driven owner) and
//! [`Engine::remove_delayed`] after the configured removal delay.
//!
//! No registration or dispatch operation returns an error. Backends that
//! cannot service a path fall back to the next method, and paths that do not
//! exist are watched for their creation.

use crate::backend::{Drivers, Target};
use crate::client::{effective_interval, Client};
use crate::coalesce::PendingChanges;
use crate::noise::NoiseFilter;
use crate::platform;
use crate::registry::{Entry, Registry};
use ahash::{AHashMap, AHashSet};
use dirwatch_core::config::clamp_poll_interval;
use dirwatch_core::path::is_device_path;
use dirwatch_core::{
    canonicalize, ChangeSet, Method, Snapshot, WatchConfig, WatchEvent, WatchModes, WatcherId,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Where events for one watcher go
///
/// Returning false means the receiving side is gone; the engine then
/// withdraws every registration of that watcher.
pub trait DeliverySink: Send {
    fn deliver(&mut self, event: WatchEvent) -> bool;
}

impl DeliverySink for tokio::sync::mpsc::UnboundedSender<WatchEvent> {
    fn deliver(&mut self, event: WatchEvent) -> bool {
        self.send(event).is_ok()
    }
}

impl DeliverySink for crossbeam_channel::Sender<WatchEvent> {
    fn deliver(&mut self, event: WatchEvent) -> bool {
        self.send(event).is_ok()
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub entries: usize,
    pub nonexistent: usize,
    pub sub_entries: usize,
    pub clients: usize,
    pub watchers: usize,
    pub suspended_watchers: usize,
    /// Entries per servicing method
    pub per_method: Vec<(Method, usize)>,
    /// Backends probed and usable
    pub available: Vec<Method>,
    pub pending_removals: usize,
    pub stopped: bool,
}

pub struct Engine {
    pub(crate) config: WatchConfig,
    pub(crate) registry: Registry,
    pub(crate) drivers: Drivers,
    pub(crate) noise: NoiseFilter,
    pub(crate) sinks: AHashMap<WatcherId, Box<dyn DeliverySink>>,
    next_watcher: u64,
    pub(crate) suspended: AHashSet<WatcherId>,
    /// Change records of the pass in progress
    pub(crate) changes: PendingChanges,
    pub(crate) outbox: Vec<WatchEvent>,
    pub(crate) remove_list: BTreeSet<PathBuf>,
    /// Set while a pass runs; removals are queued instead of applied
    pub(crate) delay_remove: bool,
    pub(crate) stopped: bool,
}

impl Engine {
    pub fn new(config: WatchConfig) -> Self {
        let noise = NoiseFilter::new(&config.filter);
        let drivers = Drivers::new(&config);
        info!(
            "Watch engine started (preferred: {}, nfs: {}, poll: {}ms)",
            config.scan.preferred_method,
            config.scan.nfs_preferred_method,
            config.scan.poll_interval_ms
        );

        Self {
            config,
            registry: Registry::new(),
            drivers,
            noise,
            sinks: AHashMap::new(),
            next_watcher: 0,
            suspended: AHashSet::new(),
            changes: PendingChanges::new(),
            outbox: Vec::new(),
            remove_list: BTreeSet::new(),
            delay_remove: false,
            stopped: false,
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    // ---- watchers ----

    /// Attach a new watcher delivering into `sink`
    pub fn attach(&mut self, sink: Box<dyn DeliverySink>) -> WatcherId {
        self.next_watcher += 1;
        let id = WatcherId::new(self.next_watcher);
        self.attach_as(id, sink);
        id
    }

    /// Attach a watcher under an id allocated elsewhere
    pub fn attach_as(&mut self, id: WatcherId, sink: Box<dyn DeliverySink>) {
        self.next_watcher = self.next_watcher.max(id.as_u64());
        if self.sinks.insert(id, sink).is_some() {
            warn!("Watcher {} attached twice, replacing its sink", id);
        }
    }

    /// Withdraw every registration of `id` and drop its sink
    pub fn detach(&mut self, id: WatcherId) {
        self.remove_all(id);
        self.suspended.remove(&id);
        self.sinks.remove(&id);
    }

    // ---- registration ----

    /// Register `path` for watcher `id`
    ///
    /// Idempotent: registering the same path again only bumps a count. A
    /// directory registered with [`WatchModes::FILES`] or
    /// [`WatchModes::SUB_DIRS`] is expanded to its children. The hint is
    /// clamped to 10 ms..=600 s.
    pub fn add_path(
        &mut self,
        id: WatcherId,
        path: &Path,
        is_dir: bool,
        modes: WatchModes,
        interval_hint: Option<Duration>,
    ) {
        let path = canonicalize(path);
        if is_device_path(&path) {
            warn!("Refusing to watch device path {}", path.display());
            return;
        }

        let interval_hint = interval_hint.map(clamp_poll_interval);
        let now = Instant::now();
        self.register(id, &path, is_dir, modes, interval_hint, None, now);

        let Some(entry) = self.registry.get(&path) else {
            return;
        };
        let expandable = entry.is_dir && entry.exists();
        // Children follow the combined hint of every registration
        let hint = entry.client(id).and_then(|c| c.interval_hint());
        if expandable && !modes.is_empty() {
            self.expand(&path, id, modes, hint, &path, false, now);
        }
    }

    /// Drop one registration of `path` by `id`
    pub fn remove_path(&mut self, id: WatcherId, path: &Path) {
        let path = canonicalize(path);
        let Some(entry) = self.registry.get_mut(&path) else {
            debug!("{} is not watched", path.display());
            return;
        };
        let Some(client) = entry.client_mut(id) else {
            debug!("{} is not watched by {}", path.display(), id);
            return;
        };
        if client.count() == 0 {
            debug!(
                "{} is only watched by {} through a recursive registration",
                path.display(),
                id
            );
            return;
        }

        let now = Instant::now();
        let registered = client.drop_registration();
        if !registered {
            entry.prune_clients();
        }
        self.refresh_interval(&path, now);
        if registered {
            self.retune_derived(id, &path, now);
            return;
        }

        self.withdraw_derived(id, &path);
        self.remove_if_unused(&path);
    }

    /// Drop every registration of `id`
    pub fn remove_all(&mut self, id: WatcherId) {
        let now = Instant::now();
        let paths = self.registry.paths_with_client(id);
        for path in &paths {
            if let Some(entry) = self.registry.get_mut(path) {
                entry.clients.retain(|c| c.watcher != id);
            }
            self.refresh_interval(path, now);
        }
        for path in paths.iter().rev() {
            self.remove_if_unused(path);
        }
        if !paths.is_empty() {
            debug!("Withdrew {} registrations of {}", paths.len(), id);
        }
    }

    /// Pause delivery to `id`; changes accumulate until [`Engine::resume`]
    pub fn suspend(&mut self, id: WatcherId) {
        self.suspended.insert(id);
        let now = Instant::now();
        for path in self.registry.paths_with_client(id) {
            if let Some(client) = self.registry.get_mut(&path).and_then(|e| e.client_mut(id)) {
                client.suspended = true;
            }
            self.refresh_interval(&path, now);
        }
        debug!("Suspended {}", id);
    }

    /// Resume delivery to `id`
    ///
    /// With `notify`, every path that changed while suspended is delivered
    /// once, as its most severe kind. Without it the backlog is discarded.
    pub fn resume(&mut self, id: WatcherId, notify: bool) {
        self.suspended.remove(&id);
        let now = Instant::now();
        let mut seen = AHashSet::new();

        for path in self.registry.paths_with_client(id) {
            let Some(entry) = self.registry.get_mut(&path) else {
                continue;
            };
            let is_dir = entry.is_dir;
            let Some(client) = entry.client_mut(id) else {
                continue;
            };
            client.suspended = false;

            if notify && client.has_pending() {
                let (own, children) = client.take_pending();
                if let Some(kind) = own {
                    if seen.insert(path.clone()) {
                        self.outbox.push(WatchEvent {
                            watcher: id,
                            path: path.clone(),
                            kind,
                            is_dir,
                        });
                    }
                }
                for (child, kind, is_dir) in children {
                    if seen.insert(child.clone()) {
                        self.outbox.push(WatchEvent {
                            watcher: id,
                            path: child,
                            kind,
                            is_dir,
                        });
                    }
                }
            } else if !notify {
                client.clear_pending();
            }
            self.refresh_interval(&path, now);
        }

        debug!("Resumed {} ({} pending)", id, self.outbox.len());
        self.flush();
    }

    pub fn is_suspended(&self, id: WatcherId) -> bool {
        self.suspended.contains(&id)
    }

    /// Whether `id` watches `path`, explicitly or through a recursive registration
    pub fn contains(&self, id: WatcherId, path: &Path) -> bool {
        self.registry
            .get(&canonicalize(path))
            .and_then(|e| e.client(id))
            .is_some()
    }

    // ---- engine-wide control ----

    /// Re-check every entry on the next tick
    pub fn rescan_all(&mut self) {
        for entry in self.registry.values_mut() {
            entry.dirty = true;
        }
        debug!("Rescan of {} entries requested", self.registry.len());
    }

    /// Freeze ticking; backends stay attached
    pub fn stop(&mut self) {
        self.stopped = true;
        info!("Watch engine stopped");
    }

    pub fn start(&mut self) {
        self.stopped = false;
        info!("Watch engine started");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Destroy entries that became unused during a pass
    pub fn remove_delayed(&mut self) {
        let queued = std::mem::take(&mut self.remove_list);
        for path in &queued {
            self.remove_if_unused(path);
        }
        if !queued.is_empty() {
            trace!("Processed {} delayed removals", queued.len());
        }
    }

    pub fn has_pending_removals(&self) -> bool {
        !self.remove_list.is_empty()
    }

    // ---- introspection ----

    /// Period the owner should tick at: the smallest interval of any polled
    /// entry, or the configured default
    pub fn tick_interval(&self) -> Duration {
        self.registry
            .values()
            .filter(|e| e.is_polled())
            .map(|e| e.poll_interval)
            .min()
            .unwrap_or_else(|| clamp_poll_interval(self.config.poll_interval()))
    }

    /// Method servicing `path`
    pub fn method_of(&self, path: &Path) -> Option<Method> {
        self.registry.get(&canonicalize(path)).and_then(|e| e.mode)
    }

    /// Poll cadence of `path`
    pub fn poll_interval(&self, path: &Path) -> Option<Duration> {
        self.registry
            .get(&canonicalize(path))
            .map(|e| e.poll_interval)
    }

    /// Probe every backend and list the usable ones
    pub fn probe_methods(&mut self) -> Vec<Method> {
        self.drivers.probe_all()
    }

    pub fn statistics(&self) -> EngineStats {
        let mut per_method: Vec<(Method, usize)> = Method::FALLBACK_ORDER
            .into_iter()
            .map(|m| (m, 0))
            .collect();
        let mut stats = EngineStats {
            entries: self.registry.len(),
            watchers: self.sinks.len(),
            suspended_watchers: self.suspended.len(),
            available: self.drivers.available(),
            pending_removals: self.remove_list.len(),
            stopped: self.stopped,
            ..Default::default()
        };

        for entry in self.registry.values() {
            if !entry.exists() {
                stats.nonexistent += 1;
            }
            stats.sub_entries += entry.sub_entries.len();
            stats.clients += entry.clients.len();
            if let Some(slot) = per_method.iter_mut().find(|(m, _)| Some(*m) == entry.mode) {
                slot.1 += 1;
            }
        }
        stats.per_method = per_method;
        stats
    }

    /// Dump counters and every entry at debug level
    pub fn log_statistics(&self) {
        let stats = self.statistics();
        debug!(
            "{} entries ({} nonexistent, {} sub-entries), {} clients, {} watchers",
            stats.entries, stats.nonexistent, stats.sub_entries, stats.clients, stats.watchers
        );
        for entry in self.registry.values() {
            debug!(
                "  {} [{}{}] {} clients, {} sub-entries",
                entry.path.display(),
                entry.mode.map(|m| m.as_str()).unwrap_or("unknown"),
                if entry.exists() { "" } else { ", nonexistent" },
                entry.clients.len(),
                entry.sub_entries.len()
            );
        }
    }

    // ---- internals ----

    /// Attach a client; returns true if a new client record was created
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn register(
        &mut self,
        id: WatcherId,
        path: &Path,
        is_dir: bool,
        modes: WatchModes,
        hint: Option<Duration>,
        derived_from: Option<&Path>,
        now: Instant,
    ) -> bool {
        self.ensure_entry(path, is_dir, now);
        let suspended = self.suspended.contains(&id);
        let Some(entry) = self.registry.get_mut(path) else {
            return false;
        };

        let created = match entry.client_mut(id) {
            Some(client) => {
                match derived_from {
                    None => client.add_registration(hint),
                    Some(root) => {
                        if client.derived_from.is_none() {
                            client.derived_from = Some(root.to_path_buf());
                        }
                        client.derived_hint = hint;
                    }
                }
                client.modes |= modes;
                false
            }
            None => {
                let mut client = Client::new(id, modes, suspended);
                match derived_from {
                    None => client.add_registration(hint),
                    Some(root) => {
                        client.derived_from = Some(root.to_path_buf());
                        client.derived_hint = hint;
                    }
                }
                entry.clients.push(client);
                true
            }
        };

        if created {
            trace!("{} watches {}", id, path.display());
        }
        self.refresh_interval(path, now);
        created
    }

    /// Find or create the entry for `path`, building the NonExistent chain
    /// up to the nearest existing ancestor
    pub(crate) fn ensure_entry(&mut self, path: &Path, is_dir: bool, now: Instant) {
        if let Some(entry) = self.registry.get(path) {
            if !entry.is_unused() {
                if entry.exists() && entry.is_dir != is_dir {
                    warn!(
                        "{} registered as a {} but is a {}",
                        path.display(),
                        kind_name(is_dir),
                        kind_name(entry.is_dir)
                    );
                }
                return;
            }
            // Queued for delayed removal; start over with a fresh entry
            self.remove_list.remove(path);
            self.destroy_entry(path);
        }

        let snapshot = Snapshot::stat(path);
        let observed_dir = snapshot.map(|s| s.is_dir).unwrap_or(is_dir);
        if observed_dir != is_dir {
            warn!(
                "{} registered as a {} but is a {}",
                path.display(),
                kind_name(is_dir),
                kind_name(observed_dir)
            );
        }

        let mut entry = Entry::new(path.to_path_buf(), observed_dir, snapshot, now);
        entry.network = platform::is_network_fs(path);
        let exists = entry.exists();
        self.registry.insert(entry);

        self.select_backend(path);
        self.refresh_interval(path, now);
        if !exists {
            self.attach_to_parent(path, now);
        }
    }

    /// Link a NonExistent entry below its parent, creating the parent first
    pub(crate) fn attach_to_parent(&mut self, path: &Path, now: Instant) {
        let Some(parent) = path.parent() else {
            return;
        };
        if parent.as_os_str().is_empty() {
            return;
        }
        self.ensure_entry(parent, true, now);
        self.registry.link_sub_entry(parent, path);
        trace!("{} waits below {}", path.display(), parent.display());
    }

    /// Pick the servicing method for an entry and acquire its handle
    ///
    /// Tries the preferred method (NFS-aware) first, then the fallback
    /// order. NonExistent entries only get a mode; they are noticed through
    /// their parent, or by polling when that mode is Stat.
    pub(crate) fn select_backend(&mut self, path: &Path) {
        let Some(entry) = self.registry.get(path) else {
            return;
        };
        debug_assert!(entry.handle.is_none(), "handle must be released first");
        let (is_dir, network, exists) = (entry.is_dir, entry.network, entry.exists());
        let preferred = if network {
            self.config.scan.nfs_preferred_method
        } else {
            self.config.scan.preferred_method
        };

        let target = Target {
            path,
            is_dir,
            network,
        };
        let mut chosen = None;
        for method in Method::order_from(preferred) {
            if !self.drivers.probe(method) {
                continue;
            }
            let Some(driver) = self.drivers.get_mut(method) else {
                continue;
            };
            if method != preferred && !driver.supports(&target) {
                continue;
            }
            if !exists {
                chosen = Some((method, None));
                break;
            }
            match driver.acquire(&target) {
                Ok(handle) => {
                    chosen = Some((method, Some(handle)));
                    break;
                }
                Err(e) => debug!("{} cannot watch {}: {}", method, path.display(), e),
            }
        }

        if let Some(entry) = self.registry.get_mut(path) {
            if let Some((method, handle)) = chosen {
                if method != preferred && exists {
                    debug!("{} falls back to {}", path.display(), method);
                }
                entry.mode = Some(method);
                entry.handle = handle;
            }
        }
    }

    /// Give the entry's backend resource back to its driver
    pub(crate) fn release_handle(&mut self, path: &Path) {
        let handle = self.registry.get_mut(path).and_then(|e| e.handle.take());
        if let Some(handle) = handle {
            self.drivers.release(handle);
        }
    }

    /// Recompute an entry's poll interval from its active clients
    pub(crate) fn refresh_interval(&mut self, path: &Path, now: Instant) {
        let default_poll = self.config.poll_interval();
        let default_nfs = self.config.nfs_poll_interval();
        let Some(entry) = self.registry.get_mut(path) else {
            return;
        };
        let default = if entry.network { default_nfs } else { default_poll };
        let interval = clamp_poll_interval(effective_interval(&entry.clients, default));
        if interval != entry.poll_interval {
            entry.poll_interval = interval;
            entry.next_poll = now + interval;
        }
    }

    /// Pass the current hint of `root` down to the clients it derived
    fn retune_derived(&mut self, id: WatcherId, root: &Path, now: Instant) {
        let hint = self
            .registry
            .get(root)
            .and_then(|e| e.client(id))
            .and_then(|c| c.interval_hint());
        for path in self.registry.paths_with_client(id) {
            let Some(client) = self.registry.get_mut(&path).and_then(|e| e.client_mut(id)) else {
                continue;
            };
            if client.derived_from.as_deref() == Some(root) && client.derived_hint != hint {
                client.derived_hint = hint;
                self.refresh_interval(&path, now);
            }
        }
    }

    /// Remove derived clients of `id` that exist because of `root`
    fn withdraw_derived(&mut self, id: WatcherId, root: &Path) {
        let now = Instant::now();
        let mut touched = Vec::new();
        for path in self.registry.paths_with_client(id) {
            let Some(entry) = self.registry.get_mut(&path) else {
                continue;
            };
            let Some(client) = entry.client_mut(id) else {
                continue;
            };
            if client.derived_from.as_deref() != Some(root) {
                continue;
            }
            client.derived_from = None;
            client.derived_hint = None;
            entry.prune_clients();
            touched.push(path);
        }
        for path in touched.iter().rev() {
            self.refresh_interval(path, now);
            self.remove_if_unused(path);
        }
    }

    /// Destroy an entry with neither clients nor sub-entries
    ///
    /// During a pass the removal is queued for [`Engine::remove_delayed`].
    pub(crate) fn remove_if_unused(&mut self, path: &Path) {
        let unused = self
            .registry
            .get(path)
            .map(|e| e.is_unused())
            .unwrap_or(false);
        if !unused {
            return;
        }
        if self.delay_remove {
            self.remove_list.insert(path.to_path_buf());
            return;
        }
        self.destroy_entry(path);
    }

    /// Drop an entry unconditionally and unlink it from its parent
    fn destroy_entry(&mut self, path: &Path) {
        self.release_handle(path);
        self.registry.remove(path);
        debug!("Removed entry {}", path.display());

        if self.registry.unlink_sub_entry(path) {
            if let Some(parent) = path.parent() {
                self.remove_if_unused(parent);
            }
        }
    }

    /// Register children of `dir` for `id` according to `modes`
    ///
    /// Subdirectories get the same modes and are expanded in turn. Child
    /// files only need their own entry when the directory is polled; event
    /// backends report them through the directory watch. With `record`, each
    /// newly registered child is reported as created.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn expand(
        &mut self,
        dir: &Path,
        id: WatcherId,
        modes: WatchModes,
        hint: Option<Duration>,
        root: &Path,
        record: bool,
        now: Instant,
    ) {
        let polled = match self.registry.get(dir) {
            Some(entry) if entry.exists() && entry.is_dir => entry.is_polled(),
            _ => return,
        };

        let children: Vec<(PathBuf, bool)> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| (e.path().to_path_buf(), e.file_type().is_dir()))
            .collect();

        for (child, is_dir) in children {
            if self.noise.is_noise(&child, is_dir) {
                continue;
            }

            if is_dir && modes.contains(WatchModes::SUB_DIRS) {
                if self.register(id, &child, true, modes, hint, Some(root), now) {
                    if record {
                        self.changes.record(child.clone(), ChangeSet::CREATED, true);
                    }
                    self.expand(&child, id, modes, hint, root, record, now);
                }
            } else if !is_dir && modes.contains(WatchModes::FILES) && polled {
                let fresh =
                    self.register(id, &child, false, WatchModes::DIR_ONLY, hint, Some(root), now);
                if fresh && record {
                    self.changes.record(child, ChangeSet::CREATED, false);
                }
            }
        }
    }

    /// Re-expand every recursive client of a directory entry
    pub(crate) fn expand_clients(&mut self, dir: &Path, now: Instant) {
        let Some(entry) = self.registry.get(dir) else {
            return;
        };
        let recursive: Vec<(WatcherId, WatchModes, Option<Duration>, PathBuf)> = entry
            .clients
            .iter()
            .filter(|c| !c.modes.is_empty())
            .filter_map(|c| {
                let root = if c.count() > 0 {
                    Some(dir.to_path_buf())
                } else {
                    c.derived_from.clone()
                };
                root.map(|root| (c.watcher, c.modes, c.interval_hint(), root))
            })
            .collect();

        for (id, modes, hint, root) in recursive {
            self.expand(dir, id, modes, hint, &root, true, now);
        }
    }
}

fn kind_name(is_dir: bool) -> &'static str {
    if is_dir {
        "directory"
    } else {
        "file"
    }
}
