//! Pipeline file loading and the `[shared]` section every rig file carries.
//!
//! Any `Deserialize` type gets [`ConfigLoader`] for free, so a pipeline
//! description is read with one call and fails with a [`ConfigError`]
//! before a single device is opened:
//!
//! ```rust,no_run
//! use rig_common::config::{ConfigError, ConfigLoader, SharedConfig};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct BenchFile {
//!     shared: SharedConfig,
//!     sample_rate: f64,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let bench = BenchFile::load(Path::new("bench.toml"))?;
//!     println!("{} sampling at {} Hz", bench.shared.name, bench.sample_rate);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a pipeline file or block setting was refused.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("Pipeline file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Unreadable file, bad TOML, unknown key or wrongly typed value.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Well-formed but inconsistent: dangling link, duplicate block,
    /// bad path condition and the like.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Verbosity of the rig log, written lowercase in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Every link send and lifecycle transition.
    Trace,
    /// Per-block lifecycle and scheduling details.
    Debug,
    /// Start, stop and per-block summaries.
    #[default]
    Info,
    /// Overruns and recoverable device trouble.
    Warn,
    /// Block failures only.
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

fn default_rig_name() -> String {
    "rig".to_string()
}

/// The `[shared]` section. Both keys are optional:
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// name = "tensile-bench-02"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Shown in the startup log line.
    #[serde(default = "default_rig_name")]
    pub name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            name: default_rig_name(),
        }
    }
}

impl SharedConfig {
    /// # Errors
    /// `ConfigError::ValidationError` if `name` is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "shared.name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read a TOML document into `Self`. Semantic checks are left to the
/// caller's own `validate()`.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// # Errors
    /// `FileNotFound` for a missing file, `ParseError` for anything
    /// unreadable or malformed.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_path_buf())
            } else {
                ConfigError::ParseError(format!("{}: {e}", path.display()))
            }
        })?;

        Self::from_toml(&content)
    }

    /// Same as [`load`](Self::load) on an in-memory document.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
