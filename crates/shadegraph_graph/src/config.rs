// SPDX-License-Identifier: MIT OR Apache-2.0
//! Session settings, stored as RON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file name
pub const CONFIG_FILE_NAME: &str = "shadegraph.ron";

/// Settings for a [`Session`](crate::session::Session)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Change records kept per space before evaluators fall back to a full flush
    pub journal_capacity: usize,
    /// Directory polled for processor modules
    pub processor_dir: Option<PathBuf>,
    /// Poll interval of the processor reloader, in milliseconds
    pub poll_interval_ms: u64,
    /// Whether evaluators count hits, misses and invalidations
    pub track_cache_statistics: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            journal_capacity: 4096,
            processor_dir: None,
            poll_interval_ms: 2000,
            track_cache_statistics: true,
        }
    }
}

impl SessionConfig {
    /// Reloader poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load settings from a RON file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config = ron::from_str(&contents)?;
        tracing::info!("Loaded settings from {:?}", path);
        Ok(config)
    }

    /// Save settings as pretty RON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Settings load/save failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File access failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents are not valid settings
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Settings could not be encoded
    #[error("Serialization error: {0}")]
    Serialize(#[from] ron::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert!(config.processor_dir.is_none());
        assert!(config.track_cache_statistics);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: SessionConfig = ron::from_str("(journal_capacity: 16)").unwrap();
        assert_eq!(config.journal_capacity, 16);
        assert_eq!(config.poll_interval_ms, 2000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let config = SessionConfig {
            processor_dir: Some(PathBuf::from("processors")),
            poll_interval_ms: 500,
            ..SessionConfig::default()
        };
        config.save(&path).unwrap();

        assert_eq!(SessionConfig::load(&path).unwrap(), config);
        assert_eq!(
            SessionConfig::load(dir.path().join("missing.ron")).unwrap(),
            SessionConfig::default()
        );
    }
}
