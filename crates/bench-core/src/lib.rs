//! Measurement engine for string and memory routine benchmarks run under an
//! instrumented RISC-V emulator.

/// Benchmark, vector configuration, and build identities.
pub mod identity;
pub use identity::{
    Benchmark, BuildId, Identity, IdentityError, VectorConfig, ALLOWED_LMULS, ALLOWED_VLENS,
    SCALAR_LMUL, SCALAR_VLEN,
};

/// Typed, validated matrix configuration.
pub mod config;
pub use config::{
    host_parallelism, ConfigError, MatrixConfig, DEFAULT_CONFIGS, DEFAULT_SIZES,
    DEFAULT_TARGET_TIME_SECS, DEFAULT_TIMEOUT, DEFAULT_WARMUP_ITERATIONS,
};

/// Setup and run failure types.
pub mod error;
pub use error::{RunFailure, SetupError};

/// Structured external commands with timeouts and per-child CPU time.
pub mod process;
pub use process::{CapturedOutput, CommandSpec, Completed, ProcessError};

/// Installed emulator discovery.
pub mod emulator;
pub use emulator::EmulatorInstall;

/// Benchmark build invocation.
pub mod builder;
pub use builder::{executable_path, run_build, BuildRequest};

/// Instrumented emulator execution and trace parsing.
pub mod measure;
pub use measure::{parse_icount, EmulatorRunner, Executor, TraceCount};

/// Measurements, samples, and result sets.
pub mod sample;
pub use sample::{CalibrationAnomaly, Measurement, ResultSet, Sample};

/// Iteration-count calibration and size sweeps.
pub mod calibrate;
pub use calibrate::{next_iterations, Calibrator};

/// Result-file export.
pub mod export;
pub use export::{write_results, ExportError};

/// Configuration unit lifecycle.
pub mod unit;
pub use unit::{ConfigUnit, TransitionError, UnitState};

/// Matrix enumeration and phase drivers.
pub mod matrix;
pub use matrix::{Matrix, PhaseTally};

/// Result-file index for reporting.
pub mod report;
pub use report::ResultIndex;

#[cfg(test)]
use serde_json as _;
