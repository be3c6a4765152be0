//! meshhost CLI Configuration
//!
//! A TOML file with an optional `[coordinator]` table (the protocol timings
//! shared by every simulated peer) and an optional `[simulation]` table.
//! Missing keys fall back to their defaults.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use meshhost_core::CoordinatorConfig;

use crate::error::{CliError, Result};

/// Settings of the simulator itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Session id shared by the simulated peers
    pub session: String,
    /// Seconds between status summaries
    pub status_interval_secs: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            session: "lobby".to_string(),
            status_interval_secs: 5,
        }
    }
}

/// Complete configuration of the CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub coordinator: CoordinatorConfig,
    pub simulation: SimulationConfig,
}

impl AppConfig {
    /// Load and validate a configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml(&contents)?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()?;
        if self.simulation.status_interval_secs == 0 {
            return Err(CliError::Config("Status interval cannot be zero".into()));
        }
        Ok(())
    }
}
