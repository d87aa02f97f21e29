//! Watch engine configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid:
//! ```toml
//! [scan]
//! preferred_method = "native"
//! nfs_preferred_method = "stat"
//! poll_interval_ms = 500
//! nfs_poll_interval_ms = 5000
//! remove_delay_ms = 500
//!
//! [fam]
//! socket = "/run/dirwatch/fam.sock"
//!
//! [filter]
//! ignore_noisy = true
//! ignore_patterns = ["*.swp"]
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `scan.preferred_method`
pub const METHOD_ENV: &str = "DIRWATCH_METHOD";

/// Bounds for any poll interval, configured or hinted
pub const MIN_POLL_INTERVAL_MS: u64 = 10;
pub const MAX_POLL_INTERVAL_MS: u64 = 600_000;

/// Clamp a poll interval into the supported range
pub fn clamp_poll_interval(interval: Duration) -> Duration {
    interval.clamp(
        Duration::from_millis(MIN_POLL_INTERVAL_MS),
        Duration::from_millis(MAX_POLL_INTERVAL_MS),
    )
}

/// Errors from loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Unknown watch method '{0}' (expected native, fam, os-watch or stat)")]
    UnknownMethod(String),

    #[error("{key} = {value} is out of range ({range})")]
    OutOfRange {
        key: &'static str,
        value: u64,
        range: &'static str,
    },
}

/// Backend used to service a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    /// Kernel event queue (inotify)
    Native,
    /// File alteration monitor socket
    Fam,
    /// OS watch service (the `notify` crate's recommended watcher)
    OsWatch,
    /// Periodic stat polling
    Stat,
}

impl Method {
    /// Preference order when nothing is configured
    pub const FALLBACK_ORDER: [Method; 4] =
        [Method::Native, Method::Fam, Method::OsWatch, Method::Stat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Native => "native",
            Method::Fam => "fam",
            Method::OsWatch => "os-watch",
            Method::Stat => "stat",
        }
    }

    /// `preferred` first, then the remaining methods in fallback order
    pub fn order_from(preferred: Method) -> impl Iterator<Item = Method> {
        std::iter::once(preferred)
            .chain(Self::FALLBACK_ORDER.into_iter().filter(move |m| *m != preferred))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "inotify" => Ok(Method::Native),
            "fam" => Ok(Method::Fam),
            "os-watch" | "oswatch" | "qfswatch" => Ok(Method::OsWatch),
            "stat" | "poll" => Ok(Method::Stat),
            _ => Err(ConfigError::UnknownMethod(s.to_string())),
        }
    }
}

/// Scheduler and backend selection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub preferred_method: Method,
    pub nfs_preferred_method: Method,
    pub poll_interval_ms: u64,
    pub nfs_poll_interval_ms: u64,
    pub remove_delay_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            preferred_method: Method::Native,
            nfs_preferred_method: Method::Stat,
            poll_interval_ms: 500,
            nfs_poll_interval_ms: 5000,
            remove_delay_ms: 500,
        }
    }
}

/// File alteration socket settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamConfig {
    /// Unix socket of the alteration monitor; unset disables the backend
    pub socket: Option<PathBuf>,
}

/// Child-name filtering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Drop events for well-known noisy files (.xsession-errors and friends)
    pub ignore_noisy: bool,
    /// Additional gitignore-style patterns matched against child names
    pub ignore_patterns: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ignore_noisy: true,
            ignore_patterns: Vec::new(),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub scan: ScanConfig,
    pub fam: FamConfig,
    pub filter: FilterConfig,
}

impl WatchConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: WatchConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from disk; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Write to disk, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let text = self.to_toml_string()?;

        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, text).map_err(write_err)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "scan.poll_interval_ms",
            self.scan.poll_interval_ms,
            MIN_POLL_INTERVAL_MS,
            MAX_POLL_INTERVAL_MS,
            "10-600000",
        )?;
        check_range(
            "scan.nfs_poll_interval_ms",
            self.scan.nfs_poll_interval_ms,
            100,
            MAX_POLL_INTERVAL_MS,
            "100-600000",
        )?;
        check_range("scan.remove_delay_ms", self.scan.remove_delay_ms, 0, 60_000, "0-60000")?;
        Ok(())
    }

    /// Override the preferred method from an optional textual value
    pub fn apply_method_override(&mut self, value: Option<&str>) -> Result<(), ConfigError> {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.scan.preferred_method = value.parse()?;
        }
        Ok(())
    }

    /// Apply `DIRWATCH_METHOD` if it is set
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let value = std::env::var(METHOD_ENV).ok();
        self.apply_method_override(value.as_deref())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.scan.poll_interval_ms)
    }

    pub fn nfs_poll_interval(&self) -> Duration {
        Duration::from_millis(self.scan.nfs_poll_interval_ms)
    }

    pub fn remove_delay(&self) -> Duration {
        Duration::from_millis(self.scan.remove_delay_ms)
    }
}

fn check_range(
    key: &'static str,
    value: u64,
    min: u64,
    max: u64,
    range: &'static str,
) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange { key, value, range });
    }
    Ok(())
}

/// Commented example configuration
pub fn example_config() -> &'static str {
    r#"# dirwatch configuration

[scan]
# First backend to try: native (inotify), fam, os-watch or stat
preferred_method = "native"
# Backend for paths on NFS/SMB mounts
nfs_preferred_method = "stat"
# Default poll cadence for stat-polled paths (10-600000)
poll_interval_ms = 500
# Poll cadence on network filesystems (100-600000)
nfs_poll_interval_ms = 5000
# Delay before entries dropped during a scan are destroyed (0-60000)
remove_delay_ms = 500

[fam]
# Unix socket of a file alteration monitor; leave unset to disable
# socket = "/run/dirwatch/fam.sock"

[filter]
# Ignore .xsession-errors, .X.err and font cache churn
ignore_noisy = true
# Extra gitignore-style patterns matched against child names
ignore_patterns = []
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = WatchConfig::from_toml_str("").unwrap();
        assert_eq!(config, WatchConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.scan.preferred_method, Method::Native);
    }

    #[test]
    fn test_example_config_parses() {
        let config = WatchConfig::from_toml_str(example_config()).unwrap();
        assert_eq!(config.scan.nfs_preferred_method, Method::Stat);
        assert!(config.fam.socket.is_none());
        assert!(config.filter.ignore_noisy);
    }

    #[test]
    fn test_partial_document() {
        let config = WatchConfig::from_toml_str(
            r#"
            [scan]
            preferred_method = "os-watch"
            poll_interval_ms = 250

            [filter]
            ignore_patterns = ["*.swp"]
            "#,
        )
        .unwrap();

        assert_eq!(config.scan.preferred_method, Method::OsWatch);
        assert_eq!(config.scan.poll_interval_ms, 250);
        assert_eq!(config.scan.nfs_poll_interval_ms, 5000);
        assert_eq!(config.filter.ignore_patterns, vec!["*.swp".to_string()]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = WatchConfig::from_toml_str("[scan]\npoll_interval_ms = 1\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                key: "scan.poll_interval_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_clamp_poll_interval() {
        assert_eq!(clamp_poll_interval(Duration::ZERO), Duration::from_millis(10));
        assert_eq!(clamp_poll_interval(Duration::MAX), Duration::from_secs(600));
        assert_eq!(
            clamp_poll_interval(Duration::from_millis(750)),
            Duration::from_millis(750)
        );
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("inotify".parse::<Method>().unwrap(), Method::Native);
        assert_eq!("Stat".parse::<Method>().unwrap(), Method::Stat);
        assert_eq!("os-watch".parse::<Method>().unwrap(), Method::OsWatch);
        assert!("kqueue".parse::<Method>().is_err());
    }

    #[test]
    fn test_method_order_puts_preferred_first() {
        let order: Vec<_> = Method::order_from(Method::OsWatch).collect();
        assert_eq!(
            order,
            vec![Method::OsWatch, Method::Native, Method::Fam, Method::Stat]
        );
    }

    #[test]
    fn test_method_override() {
        let mut config = WatchConfig::default();
        config.apply_method_override(None).unwrap();
        assert_eq!(config.scan.preferred_method, Method::Native);

        config.apply_method_override(Some("stat")).unwrap();
        assert_eq!(config.scan.preferred_method, Method::Stat);

        assert!(config.apply_method_override(Some("bogus")).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/config.toml");

        let mut config = WatchConfig::default();
        config.scan.poll_interval_ms = 1000;
        config.fam.socket = Some(PathBuf::from("/run/fam.sock"));
        config.save(&path).unwrap();

        let loaded = WatchConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = WatchConfig::load(&temp_dir.path().join("none.toml")).unwrap();
        assert_eq!(loaded, WatchConfig::default());
    }
}
