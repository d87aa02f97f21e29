//! OS watch service adapter
//!
//! Wraps the `notify` crate's recommended watcher. One non-recursive
//! subscription per entry; the notify callback thread only forwards into a
//! crossbeam channel and all translation happens in [`Driver::drain`].

use super::{duplicate_release, BackendHandle, Driver, RawEvent, Signal, Target};
use crate::error::BackendError;
use ahash::AHashMap;
use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use dirwatch_core::Method;
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

pub struct OsWatchDriver {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    /// Subscribed path -> token
    watched: AHashMap<PathBuf, u64>,
    tokens: AHashMap<u64, PathBuf>,
    next_token: u64,
}

impl OsWatchDriver {
    pub fn new() -> Result<Self, BackendError> {
        let (tx, rx) = unbounded();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;

        Ok(Self {
            watcher,
            rx,
            watched: AHashMap::new(),
            tokens: AHashMap::new(),
            next_token: 0,
        })
    }

    fn translate(&self, event: Event, out: &mut Vec<RawEvent>) {
        if event.need_rescan() {
            out.push(RawEvent::Overflow {
                method: Method::OsWatch,
            });
            return;
        }
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }

        for path in &event.paths {
            if self.watched.contains_key(path) {
                out.push(RawEvent::entry(path.clone(), self_signal(&event.kind, path)));
                continue;
            }

            let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
                continue;
            };
            if !self.watched.contains_key(parent) {
                trace!("Unattributed event for {}", path.display());
                continue;
            }
            out.push(RawEvent::entry(
                parent.to_path_buf(),
                child_signal(&event.kind, path, name.to_os_string()),
            ));
        }
    }
}

fn self_signal(kind: &EventKind, path: &Path) -> Signal {
    match kind {
        EventKind::Remove(_) => Signal::Deleted,
        EventKind::Modify(ModifyKind::Name(_)) if !path.exists() => Signal::Deleted,
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Create(_) => Signal::Rescan,
        EventKind::Modify(_) => Signal::Changed,
        _ => Signal::Rescan,
    }
}

fn child_signal(kind: &EventKind, path: &Path, name: std::ffi::OsString) -> Signal {
    match kind {
        EventKind::Create(create) => Signal::ChildCreated {
            name,
            is_dir: matches!(create, CreateKind::Folder) || path.is_dir(),
        },
        EventKind::Remove(remove) => Signal::ChildDeleted {
            name,
            is_dir: matches!(remove, RemoveKind::Folder),
        },
        // Renames arrive per side; existence tells which side this is
        EventKind::Modify(ModifyKind::Name(_)) => {
            if path.exists() {
                Signal::ChildCreated {
                    name,
                    is_dir: path.is_dir(),
                }
            } else {
                Signal::ChildDeleted {
                    name,
                    is_dir: false,
                }
            }
        }
        EventKind::Modify(_) => Signal::ChildChanged { name },
        _ => Signal::Rescan,
    }
}

impl Driver for OsWatchDriver {
    fn method(&self) -> Method {
        Method::OsWatch
    }

    fn supports(&self, target: &Target<'_>) -> bool {
        !target.network
    }

    fn acquire(&mut self, target: &Target<'_>) -> Result<BackendHandle, BackendError> {
        if self.watched.contains_key(target.path) {
            return Err(BackendError::Unavailable {
                method: Method::OsWatch,
                reason: format!("{} is already subscribed", target.path.display()),
            });
        }

        self.watcher.watch(target.path, RecursiveMode::NonRecursive)?;

        self.next_token += 1;
        self.watched.insert(target.path.to_path_buf(), self.next_token);
        self.tokens.insert(self.next_token, target.path.to_path_buf());
        debug!("OS watch on {}", target.path.display());

        Ok(BackendHandle {
            method: Method::OsWatch,
            token: self.next_token,
        })
    }

    fn release(&mut self, handle: BackendHandle) {
        let Some(path) = self.tokens.remove(&handle.token) else {
            duplicate_release(handle);
            return;
        };
        self.watched.remove(&path);
        if let Err(e) = self.watcher.unwatch(&path) {
            // The service drops subscriptions of deleted paths on its own
            trace!("unwatch {}: {}", path.display(), e);
        }
    }

    fn drain(&mut self, out: &mut Vec<RawEvent>) -> Result<(), BackendError> {
        loop {
            match self.rx.try_recv() {
                Ok(Ok(event)) => self.translate(event, out),
                Ok(Err(e)) => {
                    warn!("OS watch service error: {}", e);
                    for path in &e.paths {
                        if self.watched.contains_key(path) {
                            out.push(RawEvent::entry(path.clone(), Signal::Rescan));
                        }
                    }
                }
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(BackendError::Lost),
            }
        }
    }

    fn watch_count(&self) -> usize {
        self.tokens.len()
    }
}
