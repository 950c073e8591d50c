//! Orchestrator configuration file

use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level orchestrator configuration
///
/// ```yaml
/// manager:
///   sweep_interval_seconds: 120
///   default_strategy: round_robin
/// services:
///   postgres:
///     capability_type: storage
///     health_check_url: http://localhost:5432/health
///   api:
///     dependency_ids: [postgres]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Manager settings
    #[serde(default)]
    pub manager: ManagerSettings,

    /// Declarative service entries keyed by id
    ///
    /// Entries stay untyped here so one malformed entry does not reject the
    /// whole file; discovery validates them one by one.
    #[serde(default)]
    pub services: IndexMap<String, serde_json::Value>,
}

/// Settings for the manager facade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Seconds between manager-level health sweeps, 0 disables the sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// Load-balancing strategy used when callers do not name one
    #[serde(default = "default_strategy")]
    pub default_strategy: String,
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_strategy() -> String {
    "health_based".to_string()
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: default_sweep_interval(),
            default_strategy: default_strategy(),
        }
    }
}

impl ManagerSettings {
    /// Sweep interval, `None` when the sweep is disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_seconds > 0).then(|| Duration::from_secs(self.sweep_interval_seconds))
    }
}

impl OrchestratorConfig {
    /// Parse a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: OrchestratorConfig = serde_yaml::from_str(content)?;
        if config.manager.default_strategy.trim().is_empty() {
            return Err(Error::Config("default_strategy must not be empty".to_string()));
        }
        Ok(config)
    }
}
