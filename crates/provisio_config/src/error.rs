//! Error types for property loading.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading property files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema mismatch in {path}: {message}")]
    Schema { path: PathBuf, message: String },

    #[error("Validation failed for {path}: {}", .violations.join("; "))]
    Invalid {
        path: PathBuf,
        violations: Vec<String>,
    },

    #[error("Invalid CIDR block '{0}'")]
    InvalidCidr(String),
}

impl ConfigError {
    /// Path of the offending file, when the error is tied to one.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigError::NotFound(path) => Some(path),
            ConfigError::Io { path, .. }
            | ConfigError::Schema { path, .. }
            | ConfigError::Invalid { path, .. } => Some(path),
            ConfigError::InvalidCidr(_) => None,
        }
    }
}
