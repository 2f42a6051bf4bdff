//! The configuration matrix: every build × benchmark × config unit and the
//! phase drivers that build, run, and export them.
//!
//! Builds and runs execute on bounded rayon pools inside this process. Each
//! worker only reads its unit and returns an outcome, which the owner
//! records by suffix. External tools still run as separate processes, so a
//! crashing emulator or build only fails its own unit. A panic in a worker
//! is caught and counted as that unit's failure, but only when it unwinds.
//! An abort inside this process takes down every unit in flight.

use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::MatrixConfig;
use crate::emulator::EmulatorInstall;
use crate::error::{RunFailure, SetupError};
use crate::identity::{BuildId, Identity};
use crate::sample::ResultSet;
use crate::unit::{remove_dir_if_present, ConfigUnit, TransitionError, UnitState};

/// Success and failure counts of one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PhaseTally {
    /// Units that completed the phase.
    pub successes: usize,
    /// Units that failed the phase.
    pub failures: usize,
}

impl PhaseTally {
    /// Units submitted to the phase.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.successes + self.failures
    }

    fn record(&mut self, success: bool) {
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }

    fn warn_failures(&self, phase: &str) {
        if self.failures > 0 {
            tracing::warn!(
                failures = self.failures,
                total = self.total(),
                "{} of {} units failed to {phase}",
                self.failures,
                self.total()
            );
        }
    }
}

/// Owner of every configuration unit.
#[derive(Debug)]
pub struct Matrix {
    config: Arc<MatrixConfig>,
    units: Vec<ConfigUnit>,
    index: HashMap<String, usize>,
}

impl Matrix {
    /// Validates `config`, resets the results directory, and creates one
    /// unit per build × benchmark × config.
    ///
    /// `locate` maps each build identity to its emulator install.
    ///
    /// # Errors
    ///
    /// Any [`SetupError`] is fatal; no partial matrix is returned.
    pub fn new<F>(config: MatrixConfig, mut locate: F) -> Result<Self, SetupError>
    where
        F: FnMut(&BuildId) -> Result<EmulatorInstall, SetupError>,
    {
        config.validate()?;
        reset_dir(&config.results_dir)?;

        let config = Arc::new(config);
        let mut units = Vec::with_capacity(config.unit_count());
        let mut index = HashMap::with_capacity(config.unit_count());
        for build in &config.builds {
            let emulator = Arc::new(locate(build)?);
            for &benchmark in &config.benchmarks {
                for &vector in &config.configs {
                    let identity = Identity::new(build.clone(), benchmark, vector);
                    let unit =
                        ConfigUnit::new(identity, Arc::clone(&config), Arc::clone(&emulator))?;
                    if index.insert(unit.suffix().to_owned(), units.len()).is_some() {
                        return Err(SetupError::DuplicateIdentity(unit.suffix().to_owned()));
                    }
                    units.push(unit);
                }
            }
        }
        tracing::info!(units = units.len(), "configuration matrix ready");
        Ok(Self {
            config,
            units,
            index,
        })
    }

    /// Configuration shared by every unit.
    #[must_use]
    pub fn config(&self) -> &MatrixConfig {
        &self.config
    }

    /// Unit with the given identity suffix.
    #[must_use]
    pub fn unit(&self, suffix: &str) -> Option<&ConfigUnit> {
        self.index.get(suffix).and_then(|&i| self.units.get(i))
    }

    /// Units in enumeration order.
    #[must_use]
    pub fn units(&self) -> &[ConfigUnit] {
        &self.units
    }

    fn unit_mut(&mut self, suffix: &str) -> Option<&mut ConfigUnit> {
        let i = *self.index.get(suffix)?;
        self.units.get_mut(i)
    }

    /// Builds every unit on the build pool and records each outcome.
    ///
    /// # Errors
    ///
    /// Only fails when the worker pool cannot be started.
    pub fn build(&mut self) -> Result<PhaseTally, SetupError> {
        let mut tally = PhaseTally::default();
        for unit in &mut self.units {
            if let Err(err) = unit.mark_build_pending() {
                log_transition(&err);
                tally.failures += 1;
            }
        }

        let pool = worker_pool("build", self.config.build_jobs)?;
        let outcomes = dispatch(&pool, &self.units, UnitState::BuildPending, "built", |unit| {
            catch_worker_panic(unit, "build", || unit.build()).unwrap_or(false)
        });

        for (suffix, success) in outcomes {
            let recorded = match self.unit_mut(&suffix) {
                Some(unit) => match unit.record_build(success) {
                    Ok(()) => true,
                    Err(err) => {
                        log_transition(&err);
                        false
                    }
                },
                None => {
                    log_unknown(&suffix);
                    false
                }
            };
            tally.record(success && recorded);
        }
        tally.warn_failures("build");
        Ok(tally)
    }

    /// Runs every successfully built unit on the run pool. Units whose build
    /// failed are skipped and not counted.
    ///
    /// # Errors
    ///
    /// Only fails when the worker pool cannot be started.
    pub fn run(&mut self) -> Result<PhaseTally, SetupError> {
        let mut tally = PhaseTally::default();
        for unit in &mut self.units {
            if unit.state() == UnitState::BuiltOk {
                if let Err(err) = unit.mark_run_pending() {
                    log_transition(&err);
                    tally.failures += 1;
                }
            }
        }

        let pool = worker_pool("run", self.config.run_jobs)?;
        let outcomes = dispatch(&pool, &self.units, UnitState::RunPending, "ran", |unit| {
            catch_worker_panic(unit, "run", || unit.run())
                .unwrap_or_else(|| Err(RunFailure::WorkerPanicked))
        });

        for (suffix, outcome) in outcomes {
            let success = match self.unit_mut(&suffix) {
                Some(unit) => match unit.record_run(outcome) {
                    Ok(()) => unit.state() == UnitState::RunOk,
                    Err(err) => {
                        log_transition(&err);
                        false
                    }
                },
                None => {
                    log_unknown(&suffix);
                    false
                }
            };
            tally.record(success);
        }
        tally.warn_failures("run");
        Ok(tally)
    }

    /// Writes a result file for every unit whose run succeeded.
    #[must_use]
    pub fn export(&mut self) -> PhaseTally {
        let mut tally = PhaseTally::default();
        for unit in &mut self.units {
            if unit.state() != UnitState::RunOk {
                continue;
            }
            match unit.export() {
                Ok(()) => tally.record(true),
                Err(err) => {
                    tracing::error!(suffix = unit.suffix(), error = %err, "export failed");
                    tally.record(false);
                }
            }
        }
        tally.warn_failures("export");
        tally
    }

    /// Result sets of every successfully run unit, keyed by suffix.
    pub fn results(&self) -> impl Iterator<Item = (&str, &ResultSet)> + '_ {
        self.units
            .iter()
            .filter_map(|unit| unit.results().map(|r| (unit.suffix(), r)))
    }
}

/// Runs `work` for every unit in `state` on `pool`, returning outcomes in
/// submission order keyed by suffix.
fn dispatch<T, F>(
    pool: &rayon::ThreadPool,
    units: &[ConfigUnit],
    state: UnitState,
    progress: &str,
    work: F,
) -> Vec<(String, T)>
where
    T: Send,
    F: Fn(&ConfigUnit) -> T + Sync,
{
    let submitted: Vec<&ConfigUnit> = units.iter().filter(|u| u.state() == state).collect();
    let total = submitted.len();
    let done = AtomicUsize::new(0);
    pool.install(|| {
        submitted
            .par_iter()
            .map(|unit| {
                let outcome = work(unit);
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::info!("{progress} {finished}/{total}");
                (unit.suffix().to_owned(), outcome)
            })
            .collect()
    })
}

/// Only unwinding panics are caught; an abort still ends the process.
fn catch_worker_panic<T>(unit: &ConfigUnit, phase: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!(suffix = unit.suffix(), "{phase} worker panicked");
            None
        }
    }
}

fn worker_pool(name: &'static str, jobs: NonZeroUsize) -> Result<rayon::ThreadPool, SetupError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.get())
        .thread_name(move |i| format!("{name}-{i}"))
        .build()
        .map_err(|err| SetupError::WorkerPool(err.to_string()))
}

fn log_transition(err: &TransitionError) {
    tracing::error!(error = %err, "unit lifecycle violated");
}

fn log_unknown(suffix: &str) {
    tracing::error!(suffix, "worker outcome for unknown unit");
}

fn reset_dir(dir: &Path) -> Result<(), SetupError> {
    remove_dir_if_present(dir)?;
    fs::create_dir_all(dir).map_err(|source| SetupError::Create {
        path: dir.to_path_buf(),
        source,
    })
}
