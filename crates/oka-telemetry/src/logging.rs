//! Log subscriber setup.
//!
//! Console output is pretty or JSON. When a directory is configured, a
//! non-blocking daily rolling `combined.log` receives JSON lines as well.

use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// File name of the log sink inside the log directory.
pub const LOG_FILE_NAME: &str = "combined.log";

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    /// Human readable
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level filter used when `RUST_LOG` is unset
    pub level: String,
    /// Console format
    pub output: LogOutput,
    /// Directory for the file sink
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Pretty,
            directory: None,
        }
    }
}

impl LoggingConfig {
    /// Create a config with a level filter
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// Set the console format
    #[must_use]
    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Also write to `<directory>/combined.log`
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

/// Keeps the file writer alive. Dropping it flushes pending lines.
#[must_use = "dropping the guard stops the file sink"]
#[derive(Debug, Default)]
pub struct LogGuard {
    file: Option<WorkerGuard>,
}

impl LogGuard {
    /// Whether a file sink is active
    #[must_use]
    pub const fn has_file_sink(&self) -> bool {
        self.file.is_some()
    }

    /// Flush and close the file sink
    pub fn flush(self) {
        drop(self);
    }
}

/// Initialize the global subscriber
///
/// # Errors
/// Returns error if the log directory cannot be created or a global
/// subscriber is already installed
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard, TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (json_console, pretty_console) = match config.output {
        LogOutput::Json => (Some(fmt::layer().json().with_target(true)), None),
        LogOutput::Pretty => (None, Some(fmt::layer().with_target(true))),
    };

    let mut guard = LogGuard::default();
    let file_layer = match config.directory {
        Some(ref dir) => {
            std::fs::create_dir_all(dir).map_err(|source| TelemetryError::LogDirectory {
                path: dir.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard.file = Some(file_guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_console)
        .with(pretty_console)
        .with(file_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    info!(
        level = %config.level,
        output = ?config.output,
        file_sink = guard.has_file_sink(),
        "Logging initialized"
    );

    Ok(guard)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to install the subscriber
    #[error("Failed to initialize logging: {0}")]
    Init(String),

    /// Failed to create the log directory
    #[error("Failed to create log directory {path}: {source}")]
    LogDirectory {
        /// Directory that failed
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Failed to open a GeoIP database
    #[error("Failed to open GeoIP database {path}: {reason}")]
    GeoDatabase {
        /// Database file
        path: PathBuf,
        /// Reader error
        reason: String,
    },
}
