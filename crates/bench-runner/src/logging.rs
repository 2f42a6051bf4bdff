//! Process-wide log subscriber, installed once before any work starts.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Console filter used when neither `--log-level` nor `RUST_LOG` is set.
pub const DEFAULT_CONSOLE_FILTER: &str = "info";

/// Why logging could not be set up.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory or file could not be created.
    #[error("unable to open log file: {0}")]
    Io(#[from] io::Error),
    /// The console filter did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// A global subscriber was already installed.
    #[error("unable to install logger: {0}")]
    Init(String),
}

/// Console filter from `--log-level`, then `RUST_LOG`, then the default.
pub fn console_filter(level: Option<&str>) -> Result<EnvFilter, LoggingError> {
    match level {
        Some(directive) => {
            EnvFilter::try_new(directive).map_err(|err| LoggingError::Filter(err.to_string()))
        }
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_CONSOLE_FILTER))),
    }
}

/// Installs a console layer on stdout and a DEBUG file layer at `log_file`.
pub fn init(log_file: &Path, level: Option<&str>) -> Result<(), LoggingError> {
    if let Some(dir) = log_file.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file = File::create(log_file)?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stdout)
                .with_target(false)
                .with_filter(console_filter(level)?),
        )
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG),
        )
        .try_init()
        .map_err(|err| LoggingError::Init(err.to_string()))
}
