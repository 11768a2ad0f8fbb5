//! Configuration file support
//!
//! The CLI itself only acts on `snapshot_dir`. The other settings configure
//! conversations hosted by `tether_agent::Runtime`; the CLI resolves them for
//! `--show-config` so a host's effective values can be checked.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tether_agent::{HistoryLimits, OrchestratorConfig, RetryPolicy};
use thiserror::Error;

/// Errors from environment overrides
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var} must be a number, got {value:?}")]
    NotANumber { var: &'static str, value: String },
}

/// Configuration for tether.
///
/// Apart from `snapshot_dir`, these are runtime settings: a host embedding
/// `tether_agent::Runtime` reads the same file and resolves it the way
/// [`Config::orchestrator_config`] does. `--show-config` prints that result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Token budget for the context handed to think and observe
    pub max_context_tokens: Option<u32>,
    /// Save a snapshot whenever a conversation pauses after an answer
    pub checkpoint_on_answer: Option<bool>,
    /// Where conversation snapshots are stored
    pub snapshot_dir: Option<PathBuf>,
    pub retry: RetryConfig,
    pub history: HistoryConfig,
}

/// Retry settings for external operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

/// When a conversation continues under a condensed state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_steps: Option<u64>,
    pub max_estimated_tokens: Option<u32>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tether")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("TETHER_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Default snapshot directory
    pub fn default_snapshot_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tether")
            .join("snapshots")
    }

    /// Load config from the default path
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`. A missing or unreadable file yields defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Apply `TETHER_*` environment overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        const MAX_CONTEXT_TOKENS: &str = "TETHER_MAX_CONTEXT_TOKENS";

        if let Some(value) = lookup(MAX_CONTEXT_TOKENS) {
            let tokens = value
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::NotANumber {
                    var: MAX_CONTEXT_TOKENS,
                    value: value.clone(),
                })?;
            self.max_context_tokens = Some(tokens);
        }
        if let Some(dir) = lookup("TETHER_SNAPSHOT_DIR") {
            self.snapshot_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir
            .clone()
            .unwrap_or_else(Self::default_snapshot_dir)
    }

    /// Resolve into the orchestrator's configuration, filling in defaults
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        let retry = RetryPolicy {
            max_attempts: self.retry.max_attempts.unwrap_or(defaults.retry.max_attempts),
            interval: self
                .retry
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry.interval),
            timeout: self
                .retry
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry.timeout),
        };
        let history = HistoryLimits {
            max_steps: self.history.max_steps.unwrap_or(defaults.history.max_steps),
            max_estimated_tokens: self
                .history
                .max_estimated_tokens
                .unwrap_or(defaults.history.max_estimated_tokens),
        };

        OrchestratorConfig {
            max_context_tokens: self
                .max_context_tokens
                .unwrap_or(defaults.max_context_tokens),
            retry,
            history,
            checkpoint_on_answer: self
                .checkpoint_on_answer
                .unwrap_or(defaults.checkpoint_on_answer),
        }
    }

    /// Every setting with its effective value, for display
    pub fn effective(&self) -> Self {
        let resolved = self.orchestrator_config();
        Self {
            max_context_tokens: Some(resolved.max_context_tokens),
            checkpoint_on_answer: Some(resolved.checkpoint_on_answer),
            snapshot_dir: Some(self.snapshot_dir()),
            retry: RetryConfig {
                max_attempts: Some(resolved.retry.max_attempts),
                interval_secs: Some(resolved.retry.interval.as_secs()),
                timeout_secs: Some(resolved.retry.timeout.as_secs()),
            },
            history: HistoryConfig {
                max_steps: Some(resolved.history.max_steps),
                max_estimated_tokens: Some(resolved.history.max_estimated_tokens),
            },
        }
    }

    /// Write the example config file if none exists yet
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# tether configuration file
# Place at ~/.config/tether/config.toml (Linux) or set TETHER_CONFIG_PATH
#
# The tether CLI reads snapshot_dir. Hosts embedding the tether runtime load
# this file and use every setting below.

# Token budget for the context handed to think and observe
# (overridden by TETHER_MAX_CONTEXT_TOKENS)
max_context_tokens = 12000

# Save a snapshot every time a conversation pauses after an answer
checkpoint_on_answer = true

# Where conversation snapshots live (overridden by TETHER_SNAPSHOT_DIR)
# snapshot_dir = "~/.local/share/tether/snapshots"

# Retry policy applied to think, act, observe, compact and persist
[retry]
max_attempts = 5
interval_secs = 3
timeout_secs = 60

# Continue under a condensed state once either limit is reached
[history]
max_steps = 200
max_estimated_tokens = 48000
"#
}
