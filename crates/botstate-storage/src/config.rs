//! File storage configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for [`FileStorage`](crate::FileStorage)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileStorageConfig {
    /// Directory holding one file per key. Must already exist.
    pub directory: PathBuf,
    /// Upper bound for each key's operation, lock wait included
    #[serde(default = "default_io_timeout")]
    pub io_timeout: Option<Duration>,
    /// Write indented JSON
    #[serde(default)]
    pub pretty: bool,
    /// fsync each record before it replaces the previous version
    #[serde(default = "default_sync_on_write")]
    pub sync_on_write: bool,
}

fn default_io_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

fn default_sync_on_write() -> bool {
    true
}

impl FileStorageConfig {
    /// Create a config for the given directory
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            io_timeout: default_io_timeout(),
            pretty: false,
            sync_on_write: default_sync_on_write(),
        }
    }

    /// Set the per-key timeout
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// Disable the per-key timeout
    pub fn without_io_timeout(mut self) -> Self {
        self.io_timeout = None;
        self
    }

    /// Write indented JSON
    pub fn with_pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    /// Skip fsync before rename (faster, not crash-safe)
    pub fn without_sync(mut self) -> Self {
        self.sync_on_write = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: FileStorageConfig =
            serde_json::from_str(r#"{ "directory": "/var/lib/bot" }"#).unwrap();

        assert_eq!(config, FileStorageConfig::new("/var/lib/bot"));
        assert_eq!(config.io_timeout, Some(Duration::from_secs(30)));
        assert!(config.sync_on_write);
        assert!(!config.pretty);
    }

    #[test]
    fn test_builder() {
        let config = FileStorageConfig::new("/tmp/state")
            .with_io_timeout(Duration::from_millis(250))
            .with_pretty()
            .without_sync();

        assert_eq!(config.io_timeout, Some(Duration::from_millis(250)));
        assert!(config.pretty);
        assert!(!config.sync_on_write);
        assert_eq!(config.clone().without_io_timeout().io_timeout, None);
    }
}
