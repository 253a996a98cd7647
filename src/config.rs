//! Engine Configuration
//!
//! Loaded from a TOML file; every field has a default so a missing file or
//! a partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ObjectiveError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Log every objective event at info level
    pub log_events: bool,
    /// Scheduling tick in milliseconds (50 = 20 Hz)
    pub tick_interval_ms: u64,
    /// Buffer size of the event broadcast channel
    pub event_capacity: usize,
    /// Directory holding `objectives/*.toml`
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_events: false,
            tick_interval_ms: 50,
            event_capacity: 256,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl EngineConfig {
    /// Read config from `path`, falling back to defaults when it is absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ObjectiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            ObjectiveError::Config(message) => ObjectiveError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ObjectiveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(ObjectiveError::Config("tick_interval_ms must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(ObjectiveError::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = EngineConfig::from_toml("log_events = true").unwrap();
        assert!(config.log_events);
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_rejects_zero_tick() {
        assert!(matches!(
            EngineConfig::from_toml("tick_interval_ms = 0"),
            Err(ObjectiveError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("objectives.toml");

        let missing = EngineConfig::load(&path).unwrap();
        assert!(!missing.log_events);

        std::fs::write(&path, "tick_interval_ms = 100\ndata_dir = \"content\"\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.data_dir, PathBuf::from("content"));

        std::fs::write(&path, "tick_interval_ms = \"fast\"").unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ObjectiveError::Parse { .. })
        ));
    }
}
