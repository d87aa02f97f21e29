//! Stat poller
//!
//! Always available. Holds no OS resource; entries in this mode are
//! re-stat'ed by the scheduler whenever their countdown elapses and the
//! result is classified against the previous [`Snapshot`].

use super::{duplicate_release, BackendHandle, Driver, RawEvent, Target};
use crate::error::BackendError;
use ahash::AHashSet;
use dirwatch_core::{ChangeSet, Method, Snapshot};

/// Outcome of comparing two snapshots of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing observable moved
    Unchanged,
    /// Path exists now and did not before
    Appeared,
    /// Path existed and is gone
    Vanished,
    /// A different file object now lives at the path
    Replaced,
    /// Same object, metadata moved
    Modified,
}

impl Transition {
    /// Change kinds reported for this transition
    pub fn kinds(self) -> ChangeSet {
        match self {
            Transition::Unchanged => ChangeSet::empty(),
            Transition::Appeared => ChangeSet::CREATED,
            Transition::Vanished => ChangeSet::DELETED,
            Transition::Replaced => ChangeSet::DELETED | ChangeSet::CREATED,
            Transition::Modified => ChangeSet::CHANGED,
        }
    }
}

/// Compare the previous and current snapshot of a path
pub fn classify(old: Option<&Snapshot>, new: Option<&Snapshot>) -> Transition {
    match (old, new) {
        (None, None) => Transition::Unchanged,
        (None, Some(_)) => Transition::Appeared,
        (Some(_), None) => Transition::Vanished,
        (Some(old), Some(new)) if old.inode_differs(new) => Transition::Replaced,
        (Some(old), Some(new)) if old.metadata_differs(new) => Transition::Modified,
        (Some(_), Some(_)) => Transition::Unchanged,
    }
}

/// Bookkeeping-only driver for polled entries
#[derive(Debug, Default)]
pub struct StatDriver {
    live: AHashSet<u64>,
    next_token: u64,
}

impl StatDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for StatDriver {
    fn method(&self) -> Method {
        Method::Stat
    }

    fn supports(&self, _target: &Target<'_>) -> bool {
        true
    }

    fn acquire(&mut self, _target: &Target<'_>) -> Result<BackendHandle, BackendError> {
        self.next_token += 1;
        self.live.insert(self.next_token);
        Ok(BackendHandle {
            method: Method::Stat,
            token: self.next_token,
        })
    }

    fn release(&mut self, handle: BackendHandle) {
        if !self.live.remove(&handle.token) {
            duplicate_release(handle);
        }
    }

    fn drain(&mut self, _out: &mut Vec<RawEvent>) -> Result<(), BackendError> {
        Ok(())
    }

    fn watch_count(&self) -> usize {
        self.live.len()
    }
}
