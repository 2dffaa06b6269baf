#![forbid(unsafe_code)]

//! History configuration.
//!
//! [`HistoryConfig`] can be built in code or, with the `config` feature,
//! loaded from TOML or JSON:
//!
//! ```toml
//! # edit-history.toml
//! coalesce_window_ms = 1000
//! max_nesting_depth = 20
//! max_entries = 0
//! rollback_on_failure = true
//! ```
//!
//! ```rust,ignore
//! let config = HistoryConfig::from_toml_file("edit-history.toml")?;
//! let history = History::new(config);
//! ```
//!
//! Missing keys fall back to [`HistoryConfig::default`].

#[cfg(feature = "config")]
use std::path::Path;
use std::time::Duration;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

/// Tunable limits and policies for a [`History`](crate::History).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct HistoryConfig {
    /// Width of a coalescing time bucket in milliseconds. Default: 1000.
    pub coalesce_window_ms: u64,
    /// Deepest nested list `add` accepts (0 = unlimited). Default: 20.
    pub max_nesting_depth: usize,
    /// Most entries kept in the base timeline (0 = unlimited). Default: 0.
    pub max_entries: usize,
    /// Undo the applied part of an entry when a callback fails. Default: true.
    pub rollback_on_failure: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 1_000,
            max_nesting_depth: 20,
            max_entries: 0,
            rollback_on_failure: true,
        }
    }
}

impl HistoryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// No depth or entry limits (for testing).
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_nesting_depth: 0,
            max_entries: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce_window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    #[must_use]
    pub fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback_on_failure = rollback;
        self
    }

    #[must_use]
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    /// Check every field. An empty list means the config is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.coalesce_window_ms == 0 {
            errors.push("coalesce_window_ms must be > 0".to_string());
        }
        errors
    }

    /// `self` if valid, otherwise [`ConfigError::Validation`].
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load from a TOML string.
    #[cfg(feature = "config")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(s).map_err(|e| ConfigError::parse(ConfigFormat::Toml, e))?;
        config.validated()
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(s).map_err(|e| ConfigError::parse(ConfigFormat::Json, e))?;
        config.validated()
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }
}

/// File format a config was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl std::fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
        })
    }
}

/// Errors from loading or validating a [`HistoryConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read history config: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed {format} history config: {source}")]
    Parse {
        format: ConfigFormat,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("invalid history config: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[cfg(feature = "config")]
impl ConfigError {
    fn parse(format: ConfigFormat, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Parse {
            format,
            source: Box::new(source),
        }
    }
}
