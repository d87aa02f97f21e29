//! Filesystem change monitoring for many watchers over shared OS watches
//!
//! This crate provides:
//! - An entry registry keyed by canonical path, including entries for paths
//!   that do not exist yet
//! - Per-watcher clients with watch modes, suspension and coalesced backlogs
//! - Backend drivers (inotify, alteration monitor socket, the OS watch
//!   service, stat polling) with runtime fallback
//! - A scan & dispatch scheduler and a tokio service wrapper
//!
//! ```no_run
//! # async fn demo() -> Result<(), dirwatch::ServiceError> {
//! use dirwatch::{DirWatch, WatchConfig, WatchModes};
//!
//! let service = DirWatch::spawn(WatchConfig::default());
//! let (watcher, mut events) = service.watcher()?;
//! watcher.add_dir("/tmp/inbox", WatchModes::FILES)?;
//! while let Some(event) = events.recv().await {
//!     println!("{} {}", event.kind, event.path.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod platform;

mod client;
mod coalesce;
mod emit;
mod engine;
mod noise;
mod registry;
mod scan;
mod service;

pub use engine::{DeliverySink, Engine, EngineStats};
pub use error::{BackendError, ServiceError};
pub use noise::NoiseFilter;
pub use service::{DirWatch, Watcher};

// Shared vocabulary
pub use dirwatch_core::{
    ChangeKind, ChangeSet, Method, WatchConfig, WatchEvent, WatchModes, WatcherId,
};
