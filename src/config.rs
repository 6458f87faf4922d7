//! Configuration management.
//!
//! Loads configuration from a TOML file; every field has a default so a
//! partial file (or none at all) still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding completed archives
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,

    /// Archives older than this are deleted by the retention sweep
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Container runtime CLI binary
    #[serde(default = "default_runtime_binary")]
    pub binary: String,

    /// Image for the helper container that runs tar/du against a volume
    #[serde(default = "default_helper_image")]
    pub helper_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Remote login user
    #[serde(default)]
    pub user: String,

    /// Remote host IPv4 address
    #[serde(default)]
    pub address: String,

    /// Archive store directory on the remote host
    #[serde(default = "default_store_dir_string")]
    pub dir: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key file; SSH agent auth is used when unset
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Connect timeout for the reachability probe, in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Operator event log file
    #[serde(default = "default_journal_path")]
    pub journal: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum concurrent per-volume backup jobs
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

// Default values
fn default_store_dir() -> PathBuf {
    PathBuf::from("/var/lib/volume-backup/archives")
}

fn default_store_dir_string() -> String {
    "/var/lib/volume-backup/archives".to_string()
}

fn default_retention_days() -> i64 {
    30
}

fn default_runtime_binary() -> String {
    "docker".to_string()
}

fn default_helper_image() -> String {
    "alpine:3.20".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("/var/lib/volume-backup/backup.log")
}

fn default_max_concurrent_jobs() -> usize {
    4
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: default_runtime_binary(),
            helper_image: default_helper_image(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            user: String::new(),
            address: String::new(),
            dir: default_store_dir_string(),
            port: default_ssh_port(),
            identity_file: None,
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            journal: default_journal_path(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            runtime: RuntimeConfig::default(),
            remote: RemoteConfig::default(),
            log: LogConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.retention_days, 30);
        assert_eq!(config.runtime.binary, "docker");
        assert_eq!(config.remote.port, 22);
        assert_eq!(config.performance.max_concurrent_jobs, 4);
        assert!(config.remote.identity_file.is_none());
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[store]
dir = "/backups/archives"
retention_days = 7

[remote]
user = "backup"
address = "192.168.1.10"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.store.dir, PathBuf::from("/backups/archives"));
        assert_eq!(config.store.retention_days, 7);
        assert_eq!(config.remote.user, "backup");
        assert_eq!(config.remote.address, "192.168.1.10");
        // untouched sections keep their defaults
        assert_eq!(config.runtime.binary, "docker");
        assert_eq!(config.log.level, "info");
    }
}
