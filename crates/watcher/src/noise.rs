//! Noise filtering for child-level notifications
//!
//! Two sources of patterns, checked in order:
//! 1. Built-in noisy files (session error logs, font caches) that churn
//!    constantly and would otherwise keep every watcher of $HOME busy
//! 2. Config-based gitignore-style patterns

use dirwatch_core::FilterConfig;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;
use tracing::warn;

/// Decides which child paths are dropped before they become change records
pub struct NoiseFilter {
    /// Built-in noisy file check enabled
    ignore_noisy: bool,

    /// Compiled config patterns (None when there are none)
    patterns: Option<Gitignore>,
}

impl NoiseFilter {
    /// Build from configuration
    ///
    /// Invalid patterns are logged and skipped; filtering never blocks
    /// registration.
    pub fn new(config: &FilterConfig) -> Self {
        let patterns = if config.ignore_patterns.is_empty() {
            None
        } else {
            let mut builder = GitignoreBuilder::new("/");
            for pattern in &config.ignore_patterns {
                if let Err(e) = builder.add_line(None, pattern) {
                    warn!("Skipping invalid ignore pattern '{}': {}", pattern, e);
                }
            }
            match builder.build() {
                Ok(gitignore) => Some(gitignore),
                Err(e) => {
                    warn!("Failed to compile ignore patterns: {}", e);
                    None
                }
            }
        };

        Self {
            ignore_noisy: config.ignore_noisy,
            patterns,
        }
    }

    /// Check if a child path should be dropped
    pub fn is_noise(&self, path: &Path, is_dir: bool) -> bool {
        if self.ignore_noisy {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if is_noisy_file(name) {
                    return true;
                }
            }
        }

        if let Some(ref patterns) = self.patterns {
            if patterns.matched(path, is_dir).is_ignore() {
                return true;
            }
        }

        false
    }

    /// Number of active pattern sources
    pub fn active_sources(&self) -> usize {
        usize::from(self.ignore_noisy) + usize::from(self.patterns.is_some())
    }
}

/// Files known to change on every session start or debug write
fn is_noisy_file(name: &str) -> bool {
    if !name.starts_with('.') {
        return false;
    }

    // $HOME/.X.err grows with X server debug output
    name.starts_with(".X.err")
        || name.starts_with(".xsession-errors")
        // fontconfig rewrites its cache whenever an application starts
        || name.starts_with(".fonts.cache")
}
