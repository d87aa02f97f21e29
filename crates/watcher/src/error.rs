//! Error types for backend drivers and the service wrapper
//!
//! Driver errors never reach callers of the engine: a failed acquisition
//! falls back to the next method and a lost backend is re-evaluated.

use dirwatch_core::Method;
use std::path::PathBuf;
use thiserror::Error;

/// Failures inside a backend driver
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{method} backend unavailable: {reason}")]
    Unavailable { method: Method, reason: String },

    #[error("Cannot watch {path}: {source}")]
    Acquire {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("OS watch service error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Malformed alteration monitor message: {0}")]
    Protocol(String),

    #[error("Backend connection lost")]
    Lost,
}

impl BackendError {
    pub(crate) fn acquire(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackendError::Acquire {
            path: path.into(),
            source,
        }
    }
}

#[cfg(target_os = "linux")]
impl BackendError {
    pub(crate) fn errno(path: impl Into<PathBuf>, errno: nix::errno::Errno) -> Self {
        Self::acquire(path, std::io::Error::from_raw_os_error(errno as i32))
    }
}

/// Failures talking to a running [`DirWatch`](crate::DirWatch) service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Watch service has shut down")]
    Closed,
}
