//! Node configuration loaded from environment variables.
//!
//! Every setting has a default so the node runs with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use pairsync_core::SyncConfig;
use pairsync_shared::constants::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_PULL_PAGE_SIZE};

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// SQLite database file.
    /// Env: `PAIRSYNC_DB_PATH`
    /// Default: the platform data directory (see `Database::default_path`).
    pub db_path: Option<PathBuf>,

    /// Messages per page when serving pulls.
    /// Env: `PAIRSYNC_PULL_PAGE_SIZE`
    /// Default: `50`
    pub pull_page_size: u32,

    /// Seconds a connection may stay `connecting`.
    /// Env: `PAIRSYNC_CONNECT_TIMEOUT_SECS`
    /// Default: `10`
    pub connect_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            pull_page_size: DEFAULT_PULL_PAGE_SIZE,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("PAIRSYNC_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(value) = lookup("PAIRSYNC_PULL_PAGE_SIZE") {
            match value.parse::<u32>() {
                Ok(size) if size > 0 => config.pull_page_size = size,
                _ => tracing::warn!(
                    value = %value,
                    "Invalid PAIRSYNC_PULL_PAGE_SIZE, using default"
                ),
            }
        }

        if let Some(value) = lookup("PAIRSYNC_CONNECT_TIMEOUT_SECS") {
            match value.parse::<u64>() {
                Ok(secs) => config.connect_timeout = Duration::from_secs(secs),
                Err(e) => tracing::warn!(
                    value = %value,
                    error = %e,
                    "Invalid PAIRSYNC_CONNECT_TIMEOUT_SECS, using default"
                ),
            }
        }

        config
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            pull_page_size: self.pull_page_size,
            connect_timeout: self.connect_timeout,
            ..SyncConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> NodeConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_env() {
        let config = load(&[]);
        assert!(config.db_path.is_none());
        assert_eq!(config.pull_page_size, DEFAULT_PULL_PAGE_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = load(&[
            ("PAIRSYNC_DB_PATH", "/tmp/node.db"),
            ("PAIRSYNC_PULL_PAGE_SIZE", "20"),
            ("PAIRSYNC_CONNECT_TIMEOUT_SECS", "soon"),
        ]);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/node.db")));
        assert_eq!(config.sync_config().pull_page_size, 20);
        assert_eq!(config.connect_timeout, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));

        let config = load(&[("PAIRSYNC_PULL_PAGE_SIZE", "0")]);
        assert_eq!(config.pull_page_size, DEFAULT_PULL_PAGE_SIZE);
    }
}
