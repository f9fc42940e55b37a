//! Configuration sections.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Filesystem locations for vault state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for everything the vault persists.
    /// Default: ~/.local/share/assetvault
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,

    /// Blob store root. Default: `{state_dir}/cas`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas_dir: Option<PathBuf>,

    /// SQLite record index. Default: `{state_dir}/records.sqlite`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_db: Option<PathBuf>,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/assetvault"))
            .unwrap_or_else(|| PathBuf::from(".local/share/assetvault"))
    }

    pub fn cas_dir(&self) -> PathBuf {
        self.cas_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("cas"))
    }

    pub fn records_db(&self) -> PathBuf {
        self.records_db
            .clone()
            .unwrap_or_else(|| self.state_dir.join("records.sqlite"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            cas_dir: None,
            records_db: None,
        }
    }
}

/// Garbage collection policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcConfig {
    /// Records not accessed for this long become purge candidates.
    /// Default: 172800 (two days)
    #[serde(default = "GcConfig::default_retention_secs")]
    pub retention_secs: u64,

    /// Cadence of the periodic purge loop.
    /// Default: 3600
    #[serde(default = "GcConfig::default_interval_secs")]
    pub interval_secs: u64,

    /// Also check every stored blob for orphans, not just hashes released
    /// during this pass. Slower; reconciles leftovers from crashes.
    #[serde(default)]
    pub full_blob_scan: bool,
}

impl GcConfig {
    fn default_retention_secs() -> u64 {
        2 * 24 * 3600
    }

    fn default_interval_secs() -> u64 {
        3600
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            retention_secs: Self::default_retention_secs(),
            interval_secs: Self::default_interval_secs(),
            full_blob_scan: false,
        }
    }
}

/// Reference indexing queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long the drain loop waits for new work before shutting down.
    /// Default: 1000
    #[serde(default = "QueueConfig::default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl QueueConfig {
    fn default_idle_timeout_ms() -> u64 {
        1000
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: Self::default_idle_timeout_ms(),
        }
    }
}

/// Logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `tracing` filter directive (trace, debug, info, warn, error, or a
    /// full `EnvFilter` string). Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths_follow_state_dir() {
        let paths = PathsConfig {
            state_dir: PathBuf::from("/srv/vault"),
            cas_dir: None,
            records_db: None,
        };
        assert_eq!(paths.cas_dir(), PathBuf::from("/srv/vault/cas"));
        assert_eq!(paths.records_db(), PathBuf::from("/srv/vault/records.sqlite"));
    }

    #[test]
    fn test_explicit_paths_win() {
        let paths = PathsConfig {
            state_dir: PathBuf::from("/srv/vault"),
            cas_dir: Some(PathBuf::from("/tank/cas")),
            records_db: None,
        };
        assert_eq!(paths.cas_dir(), PathBuf::from("/tank/cas"));
    }

    #[test]
    fn test_gc_defaults() {
        let gc = GcConfig::default();
        assert_eq!(gc.retention(), Duration::from_secs(172_800));
        assert!(!gc.full_blob_scan);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let gc = GcConfig {
            interval_secs: 0,
            ..GcConfig::default()
        };
        assert_eq!(gc.interval(), Duration::from_secs(1));
    }
}
