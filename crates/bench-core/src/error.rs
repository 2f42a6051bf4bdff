//! Failure taxonomy shared across the matrix.
//!
//! - [`SetupError`] is fatal to the whole program.
//! - Build failures never leave the build runner; they surface as `false`.
//! - [`RunFailure`] aborts the remaining size sweep of one unit only.
//! - Calibration anomalies are logged, see
//!   [`CalibrationAnomaly`](crate::sample::CalibrationAnomaly).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::process::ProcessError;

/// Workspace, results-directory, or emulator-install failures.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A directory could not be wiped.
    #[error("unable to clean {}: {source}", path.display())]
    Clean {
        /// Directory being removed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A directory could not be created or populated.
    #[error("unable to create {}: {source}", path.display())]
    Create {
        /// Directory being created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// An emulator binary is missing from its install directory.
    #[error("emulator binary {} not installed", path.display())]
    EmulatorMissing {
        /// Expected binary path.
        path: PathBuf,
    },
    /// No instruction-count plugin was found in the emulator build tree.
    #[error("instruction-count plugin not found under {}", build_dir.display())]
    PluginMissing {
        /// Emulator build directory searched.
        build_dir: PathBuf,
    },
    /// Two units mapped to the same identity suffix.
    #[error("duplicate configuration identity `{0}`")]
    DuplicateIdentity(String),
    /// A worker pool could not be created.
    #[error("unable to start worker pool: {0}")]
    WorkerPool(String),
}

/// Why a unit's measurement sweep stopped.
#[derive(Debug, Error)]
pub enum RunFailure {
    /// The unit has no successful build to run.
    #[error("no successful build to run")]
    NotBuilt,
    /// The run worker panicked.
    #[error("run worker panicked")]
    WorkerPanicked,
    /// The trace temporary file could not be created.
    #[error("unable to create trace file: {0}")]
    TraceFile(#[source] io::Error),
    /// The trace could not be read back.
    #[error("unable to read trace {}: {source}", path.display())]
    TraceRead {
        /// Trace path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The trace contained no instruction count.
    #[error("no instruction count in trace {}", path.display())]
    TraceMissingCount {
        /// Trace path.
        path: PathBuf,
    },
    /// The emulator directory could not be added to the child's `PATH`.
    #[error("unable to extend PATH: {0}")]
    Environment(#[from] std::env::JoinPathsError),
    /// The emulator process failed or timed out.
    #[error("benchmark run at size {size}, {iterations} iterations: {source}")]
    Process {
        /// Input size.
        size: u64,
        /// Iterations requested.
        iterations: u64,
        /// Process failure.
        #[source]
        source: ProcessError,
    },
}

impl RunFailure {
    /// Returns `true` when the emulator was killed for exceeding its timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Process { source, .. } if source.is_timeout())
    }
}
