//! Configuration error types.

use std::path::PathBuf;

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration error type.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is semantically invalid.
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// No config existed, so the example was copied into place.
    #[error("Created {path} from the example template; edit it and restart")]
    FirstRun {
        /// Newly created config file.
        path: PathBuf,
    },

    /// Neither the config nor its example template exist.
    #[error("Config file {0} not found and no example template is available")]
    NotFound(PathBuf),
}

impl ConfigError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a validation error scoped to one listener.
    pub fn server(name: &str, msg: impl std::fmt::Display) -> Self {
        Self::Validation(format!("server '{name}': {msg}"))
    }
}
