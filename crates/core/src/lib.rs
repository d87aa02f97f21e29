//! dirwatch core - shared vocabulary for the change monitor
//!
//! This crate provides the types every layer agrees on:
//! - Change kinds and accumulated change sets
//! - Watch modes and watcher identities
//! - Delivered events
//! - Metadata snapshots and lexical path canonicalization
//! - Configuration (TOML)

pub mod config;
pub mod event;
pub mod kind;
pub mod path;
pub mod snapshot;

// Re-export main types for convenience
pub use config::{ConfigError, FamConfig, FilterConfig, Method, ScanConfig, WatchConfig};
pub use event::{WatchEvent, WatcherId};
pub use kind::{ChangeKind, ChangeSet, WatchModes};
pub use path::canonicalize;
pub use snapshot::Snapshot;
