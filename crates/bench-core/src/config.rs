//! Typed matrix configuration, validated once at load time.

use std::collections::HashSet;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::identity::{Benchmark, BuildId, VectorConfig};

/// Default target duration of one measured run, in seconds.
pub const DEFAULT_TARGET_TIME_SECS: f64 = 10.0;

/// Default iteration count of the warm-up run.
pub const DEFAULT_WARMUP_ITERATIONS: u64 = 1;

/// Default timeout for each external process.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default input sizes: powers of 2, 3, 5, 7 and 11 up to 78125.
pub const DEFAULT_SIZES: [u64; 42] = [
    1, 2, 3, 4, 5, 7, 8, 9, 11, 16, 25, 27, 32, 49, 64, 81, 121, 125, 128, 243, 256, 343, 512,
    625, 729, 1024, 1331, 2048, 2401, 3125, 4096, 6561, 8192, 14641, 15625, 16384, 16807, 19683,
    32768, 59049, 65536, 78125,
];

/// Default configurations: scalar, the smallest vector shape, the largest.
pub const DEFAULT_CONFIGS: [VectorConfig; 3] = [
    VectorConfig::Scalar,
    VectorConfig::Vector { vlen: 128, lmul: 1 },
    VectorConfig::Vector {
        vlen: 1024,
        lmul: 8,
    },
];

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A list that drives the cross product is empty.
    #[error("{0} list must not be empty")]
    EmptyList(&'static str),
    /// A list contains the same entry twice.
    #[error("duplicate {list} entry `{entry}`")]
    Duplicate {
        /// Which list.
        list: &'static str,
        /// Offending entry.
        entry: String,
    },
    /// An input size of zero was requested.
    #[error("input sizes must be positive")]
    ZeroSize,
    /// Target time is zero, negative, or not finite.
    #[error("target time must be a positive number of seconds, got {0}")]
    BadTargetTime(String),
    /// Timeout of zero would fail every invocation.
    #[error("timeout must be non-zero")]
    ZeroTimeout,
}

/// Everything the matrix needs to build and run its units.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MatrixConfig {
    /// Root directory for per-unit workspaces (`<work_dir>/build/bd-<suffix>`).
    pub work_dir: PathBuf,
    /// Reference source tree copied into every workspace.
    pub source_dir: PathBuf,
    /// Library source directory handed to the build tool.
    pub library_src_dir: PathBuf,
    /// Directory receiving one result file per unit.
    pub results_dir: PathBuf,
    /// Build tool program.
    pub make_program: PathBuf,
    /// Emulator builds to benchmark.
    pub builds: Vec<BuildId>,
    /// Benchmark routines to run.
    pub benchmarks: Vec<Benchmark>,
    /// Vector configurations to run.
    pub configs: Vec<VectorConfig>,
    /// Input sizes, measured in this order.
    pub sizes: Vec<u64>,
    /// Build with verification code and use the smaller baseline.
    pub verify: bool,
    /// Target duration of each measured run, in seconds.
    pub target_time: f64,
    /// Iterations of the warm-up run subtracted from each measurement.
    pub warmup_iterations: u64,
    /// Timeout for each external process.
    pub timeout: Duration,
    /// Worker count for the build phase.
    pub build_jobs: NonZeroUsize,
    /// Worker count for the run phase.
    pub run_jobs: NonZeroUsize,
}

impl MatrixConfig {
    /// Checks the configuration once before any work starts.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_unique("build", &self.builds)?;
        ensure_unique("benchmark", &self.benchmarks)?;
        ensure_unique("configuration", &self.configs)?;
        ensure_unique("size", &self.sizes)?;

        if self.sizes.contains(&0) {
            return Err(ConfigError::ZeroSize);
        }
        if !(self.target_time.is_finite() && self.target_time > 0.0) {
            return Err(ConfigError::BadTargetTime(self.target_time.to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Number of units the cross product produces.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.builds.len() * self.benchmarks.len() * self.configs.len()
    }
}

fn ensure_unique<T>(list: &'static str, items: &[T]) -> Result<(), ConfigError>
where
    T: Eq + Hash + std::fmt::Display,
{
    if items.is_empty() {
        return Err(ConfigError::EmptyList(list));
    }
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if !seen.insert(item) {
            return Err(ConfigError::Duplicate {
                list,
                entry: item.to_string(),
            });
        }
    }
    Ok(())
}

/// Host parallelism, falling back to a single worker.
#[must_use]
pub fn host_parallelism() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}
