//! Native event queue (Linux inotify)
//!
//! One watch descriptor per entry. The kernel hands back the same descriptor
//! when two paths resolve to one inode, so a descriptor maps to every entry
//! path that asked for it and is removed when the last of them lets go.

use super::{duplicate_release, BackendHandle, Driver, RawEvent, Signal, Target};
use crate::error::BackendError;
use ahash::{AHashMap, AHashSet};
use dirwatch_core::Method;
use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, InotifyEvent, WatchDescriptor};
use smallvec::SmallVec;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::{debug, trace, warn};

/// Events requested for every watch
fn watch_mask(is_dir: bool) -> AddWatchFlags {
    let mask = AddWatchFlags::IN_DELETE
        | AddWatchFlags::IN_DELETE_SELF
        | AddWatchFlags::IN_CREATE
        | AddWatchFlags::IN_MOVE
        | AddWatchFlags::IN_MOVE_SELF
        | AddWatchFlags::IN_DONT_FOLLOW
        | AddWatchFlags::IN_MODIFY
        | AddWatchFlags::IN_ATTRIB;

    if is_dir {
        mask | AddWatchFlags::IN_ONLYDIR
    } else {
        mask
    }
}

struct Token {
    /// None once the kernel dropped the watch (IN_IGNORED)
    wd: Option<WatchDescriptor>,
    path: PathBuf,
}

pub struct NativeDriver {
    inotify: Inotify,
    watches: AHashMap<WatchDescriptor, SmallVec<[PathBuf; 1]>>,
    tokens: AHashMap<u64, Token>,
    next_token: u64,
}

impl NativeDriver {
    pub fn new() -> Result<Self, BackendError> {
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC).map_err(
            |e| BackendError::Unavailable {
                method: Method::Native,
                reason: e.to_string(),
            },
        )?;

        Ok(Self {
            inotify,
            watches: AHashMap::new(),
            tokens: AHashMap::new(),
            next_token: 0,
        })
    }

    fn translate(
        &mut self,
        event: InotifyEvent,
        changed: &mut AHashSet<(PathBuf, OsString)>,
        out: &mut Vec<RawEvent>,
    ) {
        if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
            warn!("inotify queue overflowed, rescanning");
            out.push(RawEvent::Overflow {
                method: Method::Native,
            });
            return;
        }

        let Some(paths) = self.watches.get(&event.wd) else {
            trace!("Event for stale descriptor {:?}", event.wd);
            return;
        };
        let paths = paths.clone();

        if event.mask.contains(AddWatchFlags::IN_IGNORED) {
            self.watches.remove(&event.wd);
            for token in self.tokens.values_mut() {
                if token.wd == Some(event.wd) {
                    token.wd = None;
                }
            }
            for path in paths {
                out.push(RawEvent::entry(path, Signal::Released));
            }
            return;
        }

        let is_dir = event.mask.contains(AddWatchFlags::IN_ISDIR);
        let mask = event.mask;

        for path in paths {
            let signal = match &event.name {
                Some(name) => {
                    if mask.intersects(AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO) {
                        Signal::ChildCreated {
                            name: name.clone(),
                            is_dir,
                        }
                    } else if mask
                        .intersects(AddWatchFlags::IN_DELETE | AddWatchFlags::IN_MOVED_FROM)
                    {
                        Signal::ChildDeleted {
                            name: name.clone(),
                            is_dir,
                        }
                    } else if mask.intersects(AddWatchFlags::IN_MODIFY | AddWatchFlags::IN_ATTRIB)
                    {
                        // Buffered: one record per child per drain
                        if !changed.insert((path.clone(), name.clone())) {
                            continue;
                        }
                        Signal::ChildChanged { name: name.clone() }
                    } else {
                        continue;
                    }
                }
                None => {
                    if mask
                        .intersects(AddWatchFlags::IN_DELETE_SELF | AddWatchFlags::IN_MOVE_SELF)
                    {
                        Signal::Deleted
                    } else if mask.intersects(AddWatchFlags::IN_MODIFY | AddWatchFlags::IN_ATTRIB)
                    {
                        Signal::Changed
                    } else {
                        continue;
                    }
                }
            };
            out.push(RawEvent::entry(path, signal));
        }
    }
}

impl Driver for NativeDriver {
    fn method(&self) -> Method {
        Method::Native
    }

    fn supports(&self, target: &Target<'_>) -> bool {
        // Remote writers never reach the local kernel queue
        !target.network
    }

    fn acquire(&mut self, target: &Target<'_>) -> Result<BackendHandle, BackendError> {
        let wd = self
            .inotify
            .add_watch(target.path, watch_mask(target.is_dir))
            .map_err(|e| BackendError::errno(target.path, e))?;

        let paths = self.watches.entry(wd).or_default();
        if !paths.iter().any(|p| p == target.path) {
            paths.push(target.path.to_path_buf());
        }

        self.next_token += 1;
        self.tokens.insert(
            self.next_token,
            Token {
                wd: Some(wd),
                path: target.path.to_path_buf(),
            },
        );
        debug!("inotify watch {:?} on {}", wd, target.path.display());

        Ok(BackendHandle {
            method: Method::Native,
            token: self.next_token,
        })
    }

    fn release(&mut self, handle: BackendHandle) {
        let Some(token) = self.tokens.remove(&handle.token) else {
            duplicate_release(handle);
            return;
        };
        let Some(wd) = token.wd else {
            // Kernel already dropped it
            return;
        };

        let mut last = false;
        if let Some(paths) = self.watches.get_mut(&wd) {
            paths.retain(|p| *p != token.path);
            last = paths.is_empty();
        }
        if last {
            self.watches.remove(&wd);
            if let Err(e) = self.inotify.rm_watch(wd) {
                trace!("inotify_rm_watch {}: {}", token.path.display(), e);
            }
        }
    }

    fn drain(&mut self, out: &mut Vec<RawEvent>) -> Result<(), BackendError> {
        let mut changed = AHashSet::new();
        loop {
            match self.inotify.read_events() {
                Ok(events) if events.is_empty() => break,
                Ok(events) => {
                    for event in events {
                        self.translate(event, &mut changed, out);
                    }
                }
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(BackendError::Unavailable {
                        method: Method::Native,
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    fn watch_count(&self) -> usize {
        self.tokens.len()
    }
}
