//! Flowmate configuration.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. Built-in defaults.
//! 2. A TOML file, `config/default.toml` unless a path is given.
//! 3. `FLOWMATE_*` environment variables (a `.env` file is loaded by the
//!    binary before this module reads the environment).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use flowmate_intent::{ConnectMode, StagingConfig};

use crate::error::{ChatError, Result};

/// Config file read when no explicit path is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// The `[staging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingSection {
    /// Default: **1 500 ms**.
    pub connect_delay_ms: u64,
    /// Default: **1 500 ms**.
    pub permissions_delay_ms: u64,
    /// Default: **2 000 ms**.
    pub test_delay_ms: u64,
    /// Default: **1 000 ms**.
    pub tool_connect_delay_ms: u64,
    pub connect_mode: ConnectMode,
}

impl Default for StagingSection {
    fn default() -> Self {
        Self {
            connect_delay_ms: 1500,
            permissions_delay_ms: 1500,
            test_delay_ms: 2000,
            tool_connect_delay_ms: 1000,
            connect_mode: ConnectMode::Auto,
        }
    }
}

/// The `[log]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// FlowmateConfig
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowmateConfig {
    pub staging: StagingSection,
    pub log: LogSection,
}

impl FlowmateConfig {
    /// Load configuration and apply environment overrides.
    ///
    /// With `path = None` a missing `config/default.toml` falls back to the
    /// defaults; an explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Like [`load`](Self::load) but without environment overrides.
    pub fn load_file(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    debug!(path = DEFAULT_CONFIG_PATH, "no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse a TOML file without applying overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ChatError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    fn from_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|source| ChatError::ConfigParse {
            path: PathBuf::from(path),
            source,
        })
    }

    /// Apply `FLOWMATE_*` overrides from the process environment.
    ///
    /// Returns the names of the variables that were set.
    pub fn apply_env_overrides(&mut self) -> Result<Vec<&'static str>> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` to resolve variable names.
    ///
    /// Returns the names of the variables that were set.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<Vec<&'static str>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();
        let delays = [
            ("FLOWMATE_CONNECT_DELAY_MS", &mut self.staging.connect_delay_ms),
            (
                "FLOWMATE_PERMISSIONS_DELAY_MS",
                &mut self.staging.permissions_delay_ms,
            ),
            ("FLOWMATE_TEST_DELAY_MS", &mut self.staging.test_delay_ms),
            (
                "FLOWMATE_TOOL_CONNECT_DELAY_MS",
                &mut self.staging.tool_connect_delay_ms,
            ),
        ];
        for (key, slot) in delays {
            if let Some(raw) = lookup(key) {
                *slot = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                    ChatError::InvalidOverride {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                applied.push(key);
            }
        }

        if let Some(raw) = lookup("FLOWMATE_CONNECT_MODE") {
            self.staging.connect_mode =
                raw.parse()
                    .map_err(|reason| ChatError::InvalidOverride {
                        key: "FLOWMATE_CONNECT_MODE".to_string(),
                        reason,
                    })?;
            applied.push("FLOWMATE_CONNECT_MODE");
        }

        if let Some(level) = lookup("FLOWMATE_LOG_LEVEL") {
            self.log.level = level;
            applied.push("FLOWMATE_LOG_LEVEL");
        }
        Ok(applied)
    }

    /// The staging settings as a [`StagingConfig`].
    pub fn staging_config(&self) -> StagingConfig {
        let s = &self.staging;
        StagingConfig {
            connect_delay: Duration::from_millis(s.connect_delay_ms),
            permissions_delay: Duration::from_millis(s.permissions_delay_ms),
            test_delay: Duration::from_millis(s.test_delay_ms),
            tool_connect_delay: Duration::from_millis(s.tool_connect_delay_ms),
            connect_mode: s.connect_mode,
        }
    }
}
