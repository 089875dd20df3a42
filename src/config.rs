// src/config.rs

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
}

/// Application configuration, loaded from an optional TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker loops. Fixed for the manager's lifetime.
    pub max_workers: usize,
    /// Initial global bandwidth limit in bytes per second (0 = unlimited).
    pub bandwidth_limit: u64,
    /// Where finished downloads are written.
    pub download_dir: PathBuf,
    /// Upper bound on how long an idle worker waits before re-checking the queue.
    pub poll_interval_ms: u64,
    /// Optional per-request timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// How many completed items to remember (0 = none).
    pub completed_history: usize,
    pub user_agent: String,
    pub log_dir: PathBuf,
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// SQLite file holding the persisted pending queue.
    pub store_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: 5,
            bandwidth_limit: 1024 * 1024,
            download_dir: PathBuf::from("temp_downloads"),
            poll_interval_ms: 1000,
            request_timeout_secs: None,
            completed_history: 20,
            user_agent: default_user_agent(),
            log_dir: PathBuf::from("logs"),
            log_level: "info".to_string(),
            store_path: PathBuf::from("instance/queue.db"),
        }
    }
}

fn default_user_agent() -> String {
    format!("odm/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    /// Loads `path` if given (a missing file is an error), then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `MAX_WORKERS`, `DEFAULT_BANDWIDTH_LIMIT`, `DOWNLOAD_DIR`,
    /// `LOG_DIR` and `LOG_LEVEL` as returned by `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("MAX_WORKERS") {
            self.max_workers = parse_env("MAX_WORKERS", value)?;
        }
        if let Some(value) = lookup("DEFAULT_BANDWIDTH_LIMIT") {
            self.bandwidth_limit = parse_env("DEFAULT_BANDWIDTH_LIMIT", value)?;
        }
        if let Some(value) = lookup("DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("LOG_DIR") {
            self.log_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            self.log_level = value;
        }
        Ok(())
    }

    /// The subset the download manager consumes.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            max_workers: self.max_workers,
            bandwidth_limit: self.bandwidth_limit,
            download_dir: self.download_dir.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            request_timeout: self.request_timeout_secs.map(Duration::from_secs),
            completed_history: self.completed_history,
            user_agent: self.user_agent.clone(),
        }
    }
}

fn parse_env<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env { var, value })
}

/// Settings the download manager is built from.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_workers: usize,
    pub bandwidth_limit: u64,
    pub download_dir: PathBuf,
    pub poll_interval: Duration,
    pub request_timeout: Option<Duration>,
    pub completed_history: usize,
    pub user_agent: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Config::default().manager_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_workers, 5);
        assert_eq!(cfg.bandwidth_limit, 1_048_576);
        assert_eq!(cfg.download_dir, PathBuf::from("temp_downloads"));
        assert_eq!(cfg.poll_interval_ms, 1000);
        assert!(cfg.request_timeout_secs.is_none());
        assert!(cfg.user_agent.starts_with("odm/"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml = r#"
            max_workers = 2
            download_dir = "/srv/downloads"
            request_timeout_secs = 30
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_workers, 2);
        assert_eq!(cfg.download_dir, PathBuf::from("/srv/downloads"));
        assert_eq!(cfg.request_timeout_secs, Some(30));
        assert_eq!(cfg.bandwidth_limit, 1_048_576);
        assert_eq!(cfg.completed_history, 20);
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MAX_WORKERS", "8"),
            ("DEFAULT_BANDWIDTH_LIMIT", " 500000 "),
            ("LOG_LEVEL", "debug"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides(|var| env.get(var).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.max_workers, 8);
        assert_eq!(cfg.bandwidth_limit, 500_000);
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.log_dir, PathBuf::from("logs"));
    }

    #[test]
    fn malformed_env_override_is_an_error() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides(|var| (var == "MAX_WORKERS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "MAX_WORKERS", .. }));
    }

    #[test]
    fn manager_config_converts_units() {
        let cfg = Config {
            poll_interval_ms: 250,
            request_timeout_secs: Some(12),
            ..Config::default()
        };
        let manager = cfg.manager_config();
        assert_eq!(manager.poll_interval, Duration::from_millis(250));
        assert_eq!(manager.request_timeout, Some(Duration::from_secs(12)));
        assert_eq!(manager.max_workers, 5);
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odm.toml");
        std::fs::write(&path, "max_workers = \"three\"").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::from_file(&missing), Err(ConfigError::Read { .. })));
    }
}
