use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

// ============================================================================
// Config
// ============================================================================

/// User configuration (`~/.config/keel/config.toml`)
///
/// Every key is optional; command-line flags take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeelConfig {
    /// Snapshot location, `~` and `$VAR` are expanded
    pub state_file: Option<String>,

    /// Maximum number of steps applied at once
    pub jobs: Option<usize>,

    /// Per-step timeout in seconds
    pub step_timeout_secs: Option<u64>,

    /// Ask before deploy/destroy mutate anything
    pub confirm: bool,
}

impl Default for KeelConfig {
    fn default() -> Self {
        Self {
            state_file: None,
            jobs: None,
            step_timeout_secs: None,
            confirm: true,
        }
    }
}

impl KeelConfig {
    /// Load from the config directory, or defaults if the file doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Snapshot path: explicit flag, then config, then the state directory
    pub fn state_file(&self, flag: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = flag {
            return Ok(path.to_path_buf());
        }
        match &self.state_file {
            Some(configured) => Ok(paths::expand(configured)),
            None => paths::default_state_file(),
        }
    }

    pub fn jobs(&self, flag: Option<usize>) -> Option<usize> {
        flag.or(self.jobs)
    }

    pub fn step_timeout(&self, flag: Option<u64>) -> Option<Duration> {
        flag.or(self.step_timeout_secs).map(Duration::from_secs)
    }
}
