//! Backend drivers
//!
//! Every notification facility implements [`Driver`]. Drivers are probed
//! lazily, the first time an entry asks for them, and a driver that fails
//! to initialize is never retried. Drivers translate whatever their OS
//! facility reports into [`RawEvent`]s keyed by the watched entry path; the
//! scheduler decides what those mean for clients.

#[cfg(target_os = "linux")]
pub mod native;

pub mod fam;
pub mod os_watch;
pub mod stat;

use crate::error::BackendError;
use dirwatch_core::{Method, WatchConfig};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[cfg(target_os = "linux")]
use native::NativeDriver;

use fam::FamDriver;
use os_watch::OsWatchDriver;
use stat::StatDriver;

/// Opaque resource a driver holds for one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendHandle {
    pub method: Method,
    pub token: u64,
}

/// What a driver is asked to watch
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub path: &'a Path,
    pub is_dir: bool,
    /// Path lives on NFS/SMB
    pub network: bool,
}

/// Normalized notification for one watched entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The entry itself was modified
    Changed,
    /// The entry itself was removed or moved away
    Deleted,
    /// A child appeared in a watched directory
    ChildCreated { name: OsString, is_dir: bool },
    /// A child disappeared from a watched directory
    ChildDeleted { name: OsString, is_dir: bool },
    /// A child of a watched directory was modified
    ChildChanged { name: OsString },
    /// Something happened that cannot be attributed precisely
    Rescan,
    /// The OS dropped the watch (watched object gone or unmounted)
    Released,
}

/// Output of [`Driver::drain`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Entry { path: PathBuf, signal: Signal },
    /// The driver lost events; everything must be re-checked
    Overflow { method: Method },
}

impl RawEvent {
    pub fn entry(path: impl Into<PathBuf>, signal: Signal) -> Self {
        RawEvent::Entry {
            path: path.into(),
            signal,
        }
    }
}

/// One notification strategy
pub trait Driver: Send {
    fn method(&self) -> Method;

    /// Whether this driver can service `target` at all
    fn supports(&self, target: &Target<'_>) -> bool;

    /// Start watching an existing path
    fn acquire(&mut self, target: &Target<'_>) -> Result<BackendHandle, BackendError>;

    /// Stop watching; releasing an unknown handle is a contract violation
    fn release(&mut self, handle: BackendHandle);

    /// Move pending notifications into `out` without blocking
    ///
    /// An error means the driver is unusable from now on.
    fn drain(&mut self, out: &mut Vec<RawEvent>) -> Result<(), BackendError>;

    /// Live handles
    fn watch_count(&self) -> usize;
}

/// Report a release of a handle the driver never issued
pub(crate) fn duplicate_release(handle: BackendHandle) {
    tracing::error!(
        "{} backend asked to release unknown handle {}",
        handle.method,
        handle.token
    );
    debug_assert!(false, "duplicate release of {:?}", handle);
}

enum Probe<T> {
    Untried,
    Ready(T),
    Failed,
}

impl<T: Driver> Probe<T> {
    fn ensure(&mut self, method: Method, init: impl FnOnce() -> Result<T, BackendError>) -> bool {
        if let Probe::Untried = self {
            *self = match init() {
                Ok(driver) => {
                    info!("{} backend ready", method);
                    Probe::Ready(driver)
                }
                Err(e) => {
                    info!("{} backend unavailable: {}", method, e);
                    Probe::Failed
                }
            };
        }
        matches!(self, Probe::Ready(_))
    }

    fn ready(&self) -> Option<&T> {
        match self {
            Probe::Ready(driver) => Some(driver),
            _ => None,
        }
    }

    fn ready_mut(&mut self) -> Option<&mut T> {
        match self {
            Probe::Ready(driver) => Some(driver),
            _ => None,
        }
    }
}

/// The fixed set of drivers an engine can use
pub(crate) struct Drivers {
    #[cfg(target_os = "linux")]
    native: Probe<NativeDriver>,
    fam: Probe<FamDriver>,
    os_watch: Probe<OsWatchDriver>,
    stat: StatDriver,
    fam_socket: Option<PathBuf>,
}

impl Drivers {
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            #[cfg(target_os = "linux")]
            native: Probe::Untried,
            fam: Probe::Untried,
            os_watch: Probe::Untried,
            stat: StatDriver::new(),
            fam_socket: config.fam.socket.clone(),
        }
    }

    /// Initialize `method` on first use; true if it is usable
    pub fn probe(&mut self, method: Method) -> bool {
        match method {
            #[cfg(target_os = "linux")]
            Method::Native => self.native.ensure(method, NativeDriver::new),
            #[cfg(not(target_os = "linux"))]
            Method::Native => false,
            Method::Fam => {
                let socket = self.fam_socket.clone();
                self.fam.ensure(method, || match socket {
                    Some(socket) => FamDriver::connect(&socket),
                    None => Err(BackendError::Unavailable {
                        method,
                        reason: "no socket configured".to_string(),
                    }),
                })
            }
            Method::OsWatch => self.os_watch.ensure(method, OsWatchDriver::new),
            Method::Stat => true,
        }
    }

    /// Probe every method and list the usable ones in fallback order
    pub fn probe_all(&mut self) -> Vec<Method> {
        Method::FALLBACK_ORDER
            .into_iter()
            .filter(|m| self.probe(*m))
            .collect()
    }

    /// Usable methods among those already probed
    pub fn available(&self) -> Vec<Method> {
        Method::FALLBACK_ORDER
            .into_iter()
            .filter(|m| self.get(*m).is_some())
            .collect()
    }

    pub fn get(&self, method: Method) -> Option<&dyn Driver> {
        match method {
            #[cfg(target_os = "linux")]
            Method::Native => self.native.ready().map(|d| d as &dyn Driver),
            #[cfg(not(target_os = "linux"))]
            Method::Native => None,
            Method::Fam => self.fam.ready().map(|d| d as &dyn Driver),
            Method::OsWatch => self.os_watch.ready().map(|d| d as &dyn Driver),
            Method::Stat => Some(&self.stat),
        }
    }

    pub fn get_mut(&mut self, method: Method) -> Option<&mut dyn Driver> {
        match method {
            #[cfg(target_os = "linux")]
            Method::Native => self.native.ready_mut().map(|d| d as &mut dyn Driver),
            #[cfg(not(target_os = "linux"))]
            Method::Native => None,
            Method::Fam => self.fam.ready_mut().map(|d| d as &mut dyn Driver),
            Method::OsWatch => self.os_watch.ready_mut().map(|d| d as &mut dyn Driver),
            Method::Stat => Some(&mut self.stat),
        }
    }

    /// Release through the owning driver
    ///
    /// Handles of a driver that has since been lost are simply forgotten.
    pub fn release(&mut self, handle: BackendHandle) {
        match self.get_mut(handle.method) {
            Some(driver) => driver.release(handle),
            None => debug!(
                "Dropping handle {} of unavailable {} backend",
                handle.token, handle.method
            ),
        }
    }

    /// Drain every ready driver; returns the methods that failed for good
    pub fn drain(&mut self, out: &mut Vec<RawEvent>) -> Vec<Method> {
        let mut lost = Vec::new();
        for method in Method::FALLBACK_ORDER {
            let Some(driver) = self.get_mut(method) else {
                continue;
            };
            if let Err(e) = driver.drain(out) {
                warn!("{} backend failed, falling back: {}", method, e);
                lost.push(method);
            }
        }
        for method in &lost {
            self.disable(*method);
        }
        lost
    }

    /// Drop a driver and never probe it again
    pub fn disable(&mut self, method: Method) {
        match method {
            #[cfg(target_os = "linux")]
            Method::Native => self.native = Probe::Failed,
            #[cfg(not(target_os = "linux"))]
            Method::Native => {}
            Method::Fam => self.fam = Probe::Failed,
            Method::OsWatch => self.os_watch = Probe::Failed,
            Method::Stat => {}
        }
    }
}
