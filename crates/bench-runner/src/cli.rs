//! Command-line arguments.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use bench_core::{
    host_parallelism, Benchmark, BuildId, MatrixConfig, VectorConfig, DEFAULT_CONFIGS,
    DEFAULT_SIZES, DEFAULT_TARGET_TIME_SECS, DEFAULT_TIMEOUT, DEFAULT_WARMUP_ITERATIONS,
};
use clap::Parser;

/// Measure string and memory routines under instrumented RISC-V emulators
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "strmem-bench", version, about)]
pub struct Cli {
    /// Emulator build identities to measure against (e.g. a commit id)
    #[arg(long = "emulator", value_name = "ID", required = true, num_args = 1..)]
    pub emulators: Vec<BuildId>,

    /// Benchmark directory holding `src/`, unit workspaces, and results
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub bench_dir: PathBuf,

    /// Top-level directory holding emulator builds, installs, and library sources
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub top_dir: PathBuf,

    /// Emulator build trees (default: <TOP_DIR>/build)
    #[arg(long, value_name = "DIR")]
    pub emulator_build_dir: Option<PathBuf>,

    /// Emulator installs (default: <TOP_DIR>/install)
    #[arg(long, value_name = "DIR")]
    pub emulator_install_dir: Option<PathBuf>,

    /// Library sources handed to the build (default: <TOP_DIR>/sifive-libc/src)
    #[arg(long, value_name = "DIR")]
    pub library_src_dir: Option<PathBuf>,

    /// Results directory (default: <BENCH_DIR>/results-<DATESTAMP>)
    #[arg(long, value_name = "DIR")]
    pub results_dir: Option<PathBuf>,

    /// Routines to benchmark
    #[arg(long, value_name = "NAME", num_args = 1.., value_delimiter = ',',
          default_values_t = Benchmark::ALL)]
    pub benchmarks: Vec<Benchmark>,

    /// Configurations: `stdlib` or `<VLEN>-<LMUL>`
    #[arg(long, value_name = "CONF", num_args = 1.., value_delimiter = ',',
          default_values_t = DEFAULT_CONFIGS)]
    pub configs: Vec<VectorConfig>,

    /// Input sizes, measured in the order given
    #[arg(long, value_name = "BYTES", num_args = 1.., value_delimiter = ',',
          default_values_t = DEFAULT_SIZES)]
    pub sizes: Vec<u64>,

    /// Compile in result verification and use the smaller baselines
    #[arg(long)]
    pub verify: bool,

    /// Seconds each measured sample should take
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TARGET_TIME_SECS)]
    pub target_time: f64,

    /// Warm-up iterations run before each measurement
    #[arg(long, value_name = "N", default_value_t = DEFAULT_WARMUP_ITERATIONS)]
    pub warmup: u64,

    /// Timeout in seconds for each build and each emulator run
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Build tool
    #[arg(long = "make", value_name = "PROGRAM", default_value = "make")]
    pub make_program: PathBuf,

    /// Concurrent builds (default: host parallelism)
    #[arg(long, value_name = "N")]
    pub build_jobs: Option<NonZeroUsize>,

    /// Concurrent runs (default: host parallelism)
    #[arg(long, value_name = "N")]
    pub run_jobs: Option<NonZeroUsize>,

    /// Only index existing results, do not build or run
    #[arg(long)]
    pub report_only: bool,

    /// Directory for the debug log file
    #[arg(long, value_name = "DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Log file name prefix
    #[arg(long, value_name = "PREFIX", default_value = "rab")]
    pub log_prefix: String,

    /// Console log filter (overrides RUST_LOG, default: info)
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Timestamp used in log and results names (default: now)
    #[arg(long, value_name = "STAMP")]
    pub datestamp: Option<String>,
}

/// `%Y-%m-%d-%H-%M-%S` in local time.
pub fn datestamp_now() -> String {
    chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string()
}

impl Cli {
    /// Emulator build-tree root.
    pub fn emulator_build_dir(&self) -> PathBuf {
        self.emulator_build_dir
            .clone()
            .unwrap_or_else(|| self.top_dir.join("build"))
    }

    /// Emulator install root.
    pub fn emulator_install_dir(&self) -> PathBuf {
        self.emulator_install_dir
            .clone()
            .unwrap_or_else(|| self.top_dir.join("install"))
    }

    /// Log file path for `datestamp`.
    pub fn log_file(&self, datestamp: &str) -> PathBuf {
        self.log_dir
            .join(format!("{}-{datestamp}.log", self.log_prefix))
    }

    /// Matrix configuration, not yet validated.
    pub fn matrix_config(&self, datestamp: &str) -> MatrixConfig {
        let jobs = host_parallelism();
        MatrixConfig {
            work_dir: self.bench_dir.clone(),
            source_dir: self.bench_dir.join("src"),
            library_src_dir: self
                .library_src_dir
                .clone()
                .unwrap_or_else(|| self.top_dir.join("sifive-libc").join("src")),
            results_dir: self
                .results_dir
                .clone()
                .unwrap_or_else(|| self.bench_dir.join(format!("results-{datestamp}"))),
            make_program: self.make_program.clone(),
            builds: self.emulators.clone(),
            benchmarks: self.benchmarks.clone(),
            configs: self.configs.clone(),
            sizes: self.sizes.clone(),
            verify: self.verify,
            target_time: self.target_time,
            warmup_iterations: self.warmup,
            timeout: Duration::from_secs(self.timeout),
            build_jobs: self.build_jobs.unwrap_or(jobs),
            run_jobs: self.run_jobs.unwrap_or(jobs),
        }
    }
}
