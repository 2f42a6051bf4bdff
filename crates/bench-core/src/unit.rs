//! One configuration unit: workspace, build, measurement sweep, export.
//!
//! Build and run are pure with respect to the unit (`&self`) so they can
//! execute on worker threads. Their outcomes are recorded afterwards by the
//! owner through the `record_*` methods, which enforce the lifecycle:
//!
//! ```text
//! Initialized -> BuildPending -> BuiltOk -> RunPending -> RunOk -> Exported
//!                             \-> BuildFailed            \-> RunFailed
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::builder::{self, BuildRequest};
use crate::calibrate::Calibrator;
use crate::config::MatrixConfig;
use crate::emulator::EmulatorInstall;
use crate::error::{RunFailure, SetupError};
use crate::export::{self, ExportError};
use crate::identity::Identity;
use crate::measure::EmulatorRunner;
use crate::sample::ResultSet;

/// Directory under the work dir holding every unit workspace.
pub const WORKSPACE_ROOT: &str = "build";

/// Lifecycle of a configuration unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum UnitState {
    /// Workspace prepared, nothing submitted yet.
    #[default]
    Initialized,
    /// Submitted to the build pool.
    BuildPending,
    /// Executable produced.
    BuiltOk,
    /// Build failed or timed out. Absorbing.
    BuildFailed,
    /// Submitted to the run pool.
    RunPending,
    /// Every requested size measured.
    RunOk,
    /// The sweep aborted. Absorbing.
    RunFailed,
    /// Result file written. Absorbing.
    Exported,
}

impl UnitState {
    /// Returns `true` when `next` may follow `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Self::Initialized, Self::BuildPending)
                | (Self::BuildPending, Self::BuiltOk | Self::BuildFailed)
                | (Self::BuiltOk, Self::RunPending)
                | (Self::RunPending, Self::RunOk | Self::RunFailed)
                | (Self::RunOk, Self::Exported)
        )
    }

    /// Returns `true` for states nothing may follow.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::BuildFailed | Self::RunFailed | Self::Exported)
    }
}

/// An out-of-order lifecycle step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unit {suffix}: illegal transition {from:?} -> {to:?}")]
pub struct TransitionError {
    /// Unit identity suffix.
    pub suffix: String,
    /// Current state.
    pub from: UnitState,
    /// Requested state.
    pub to: UnitState,
}

/// Mutable record for one identity.
#[derive(Debug)]
pub struct ConfigUnit {
    identity: Identity,
    suffix: String,
    workspace: PathBuf,
    executable: PathBuf,
    result_file: PathBuf,
    config: Arc<MatrixConfig>,
    emulator: Arc<EmulatorInstall>,
    state: UnitState,
    results: Option<ResultSet>,
}

impl ConfigUnit {
    /// Creates the unit and resets its workspace to a fresh copy of the
    /// reference source tree.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] when the workspace cannot be wiped or copied.
    pub fn new(
        identity: Identity,
        config: Arc<MatrixConfig>,
        emulator: Arc<EmulatorInstall>,
    ) -> Result<Self, SetupError> {
        let suffix = identity.suffix();
        let workspace = config
            .work_dir
            .join(WORKSPACE_ROOT)
            .join(format!("bd-{suffix}"));
        reset_workspace(&workspace, &config.source_dir)?;

        let executable = builder::executable_path(&workspace, identity.benchmark);
        let result_file = config.results_dir.join(format!("{suffix}.csv"));
        tracing::debug!(%suffix, workspace = %workspace.display(), "unit workspace ready");
        Ok(Self {
            identity,
            suffix,
            workspace,
            executable,
            result_file,
            config,
            emulator,
            state: UnitState::Initialized,
            results: None,
        })
    }

    /// Identity of this unit.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Collision-free key for this unit.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Private build directory.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Where the build leaves its executable.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Where results are exported.
    #[must_use]
    pub fn result_file(&self) -> &Path {
        &self.result_file
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> UnitState {
        self.state
    }

    /// Measured samples, once the run succeeded.
    #[must_use]
    pub const fn results(&self) -> Option<&ResultSet> {
        self.results.as_ref()
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!("unit", suffix = %self.suffix)
    }

    /// Builds the benchmark in the workspace.
    #[must_use]
    pub fn build(&self) -> bool {
        let span = self.span();
        let _guard = span.enter();
        let request = BuildRequest {
            make_program: &self.config.make_program,
            workspace: &self.workspace,
            library_src_dir: &self.config.library_src_dir,
            benchmark: self.identity.benchmark,
            config: self.identity.config,
            verify: self.config.verify,
            timeout: self.config.timeout,
        };
        builder::run_build(&request)
    }

    /// Sweeps every configured size.
    ///
    /// # Errors
    ///
    /// [`RunFailure::NotBuilt`] unless the build succeeded, otherwise the
    /// failure that aborted the sweep.
    pub fn run(&self) -> Result<ResultSet, RunFailure> {
        if !matches!(self.state, UnitState::BuiltOk | UnitState::RunPending) {
            return Err(RunFailure::NotBuilt);
        }
        let span = self.span();
        let _guard = span.enter();

        let runner = EmulatorRunner {
            emulator: &self.emulator,
            workspace: &self.workspace,
            executable: &self.executable,
            vlen: self.identity.config.vlen(),
            timeout: self.config.timeout,
        };
        let calibrator = Calibrator {
            target_time: self.config.target_time,
            warmup_iterations: self.config.warmup_iterations,
        };
        let baseline = self
            .identity
            .benchmark
            .baseline_iterations(self.config.verify);
        calibrator.sweep(&runner, baseline, &self.config.sizes)
    }

    fn transition(&mut self, to: UnitState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError {
                suffix: self.suffix.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Marks the unit as submitted for building.
    ///
    /// # Errors
    ///
    /// Fails unless the unit is freshly initialized.
    pub fn mark_build_pending(&mut self) -> Result<(), TransitionError> {
        self.transition(UnitState::BuildPending)
    }

    /// Records the build outcome.
    ///
    /// # Errors
    ///
    /// Fails unless a build is pending.
    pub fn record_build(&mut self, success: bool) -> Result<(), TransitionError> {
        self.transition(if success {
            UnitState::BuiltOk
        } else {
            UnitState::BuildFailed
        })
    }

    /// Marks the unit as submitted for running.
    ///
    /// # Errors
    ///
    /// Fails unless the build succeeded.
    pub fn mark_run_pending(&mut self) -> Result<(), TransitionError> {
        self.transition(UnitState::RunPending)
    }

    /// Records the run outcome, keeping results only when every size was
    /// measured.
    ///
    /// # Errors
    ///
    /// Fails unless a run is pending.
    pub fn record_run(
        &mut self,
        outcome: Result<ResultSet, RunFailure>,
    ) -> Result<(), TransitionError> {
        match outcome {
            Ok(results) if results.covers(&self.config.sizes) => {
                self.transition(UnitState::RunOk)?;
                self.results = Some(results);
            }
            Ok(results) => {
                tracing::warn!(
                    suffix = %self.suffix,
                    recorded = results.len(),
                    requested = self.config.sizes.len(),
                    "incomplete result set discarded"
                );
                self.transition(UnitState::RunFailed)?;
            }
            Err(failure) => {
                tracing::warn!(
                    suffix = %self.suffix,
                    timed_out = failure.is_timeout(),
                    error = %failure,
                    "run failed"
                );
                self.transition(UnitState::RunFailed)?;
            }
        }
        Ok(())
    }

    /// Writes the result file. On failure the unit stays [`UnitState::RunOk`].
    ///
    /// # Errors
    ///
    /// Fails unless the run succeeded, or when the file cannot be written.
    pub fn export(&mut self) -> Result<(), ExportError> {
        let Some(results) = self.results.as_ref().filter(|_| self.state == UnitState::RunOk)
        else {
            return Err(ExportError::Transition(TransitionError {
                suffix: self.suffix.clone(),
                from: self.state,
                to: UnitState::Exported,
            }));
        };
        export::write_results(&self.result_file, &self.identity, results)?;
        self.transition(UnitState::Exported)?;
        Ok(())
    }
}

/// Destroys `workspace` if present and fills it with a copy of `source`.
fn reset_workspace(workspace: &Path, source: &Path) -> Result<(), SetupError> {
    remove_dir_if_present(workspace)?;
    copy_tree(source, workspace).map_err(|source| SetupError::Create {
        path: workspace.to_path_buf(),
        source,
    })
}

/// Removes `dir` recursively; a missing directory is not an error.
pub(crate) fn remove_dir_if_present(dir: &Path) -> Result<(), SetupError> {
    match fs::remove_dir_all(dir) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(SetupError::Clean {
            path: dir.to_path_buf(),
            source: err,
        }),
        _ => Ok(()),
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::identity::{Benchmark, BuildId, VectorConfig};
    use crate::sample::Sample;
    use rstest::rstest;

    struct Fixture {
        _root: tempfile::TempDir,
        config: Arc<MatrixConfig>,
        emulator: Arc<EmulatorInstall>,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().expect("tempdir");
        let source = root.path().join("src");
        fs::create_dir_all(source.join("lib")).expect("source tree");
        fs::write(source.join("Makefile"), "all:\n").expect("makefile");
        fs::write(source.join("lib/main.c"), "int main(void){return 0;}\n").expect("main.c");
        let config = MatrixConfig {
            work_dir: root.path().to_path_buf(),
            source_dir: source,
            results_dir: root.path().join("results"),
            ..sample_config()
        };
        Fixture {
            config: Arc::new(config),
            emulator: Arc::new(EmulatorInstall::new(
                root.path().join("install"),
                root.path().join("libinsn.so"),
            )),
            _root: root,
        }
    }

    fn identity() -> Identity {
        Identity::new(
            BuildId::new("base").expect("valid"),
            Benchmark::Strlen,
            VectorConfig::Vector { vlen: 128, lmul: 1 },
        )
    }

    fn unit(fx: &Fixture) -> ConfigUnit {
        ConfigUnit::new(identity(), Arc::clone(&fx.config), Arc::clone(&fx.emulator))
            .expect("workspace setup")
    }

    fn full_results(sizes: &[u64]) -> ResultSet {
        let mut set = ResultSet::new();
        for &size in sizes {
            set.push(
                size,
                Sample {
                    iterations: 10,
                    time: 1.0,
                    icount: 100,
                },
            );
        }
        set
    }

    #[test]
    fn paths_follow_identity_suffix() {
        let fx = fixture();
        let u = unit(&fx);
        assert_eq!(u.suffix(), "base-strlen-128-m1");
        assert!(u.workspace().ends_with("build/bd-base-strlen-128-m1"));
        assert!(u.executable().ends_with("bd-base-strlen-128-m1/benchmark-strlen.exe"));
        assert_eq!(
            u.result_file(),
            fx.config.results_dir.join("base-strlen-128-m1.csv")
        );
        assert_eq!(u.state(), UnitState::Initialized);
        assert!(u.results().is_none());
    }

    #[test]
    fn workspace_setup_is_idempotent() {
        let fx = fixture();
        let first = unit(&fx);
        fs::write(first.workspace().join("stale.o"), b"junk").expect("residue");
        fs::remove_file(first.workspace().join("Makefile")).expect("remove");

        let second = unit(&fx);
        assert_eq!(first.workspace(), second.workspace());
        assert!(!second.workspace().join("stale.o").exists());
        assert!(second.workspace().join("Makefile").is_file());
        assert!(second.workspace().join("lib/main.c").is_file());
    }

    #[test]
    fn missing_source_tree_is_setup_failure() {
        let fx = fixture();
        let config = MatrixConfig {
            source_dir: fx.config.work_dir.join("nope"),
            ..(*fx.config).clone()
        };
        let err = ConfigUnit::new(identity(), Arc::new(config), Arc::clone(&fx.emulator))
            .expect_err("source missing");
        assert!(matches!(err, SetupError::Create { .. }));
    }

    #[rstest]
    #[case(UnitState::Initialized, UnitState::BuildPending, true)]
    #[case(UnitState::BuildPending, UnitState::BuiltOk, true)]
    #[case(UnitState::BuildPending, UnitState::BuildFailed, true)]
    #[case(UnitState::BuiltOk, UnitState::RunPending, true)]
    #[case(UnitState::RunPending, UnitState::RunFailed, true)]
    #[case(UnitState::RunOk, UnitState::Exported, true)]
    #[case(UnitState::Initialized, UnitState::BuiltOk, false)]
    #[case(UnitState::BuildFailed, UnitState::RunPending, false)]
    #[case(UnitState::BuildFailed, UnitState::BuildPending, false)]
    #[case(UnitState::RunFailed, UnitState::RunPending, false)]
    #[case(UnitState::Exported, UnitState::RunOk, false)]
    fn transitions(#[case] from: UnitState, #[case] to: UnitState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    const ALL_STATES: [UnitState; 8] = [
        UnitState::Initialized,
        UnitState::BuildPending,
        UnitState::BuiltOk,
        UnitState::BuildFailed,
        UnitState::RunPending,
        UnitState::RunOk,
        UnitState::RunFailed,
        UnitState::Exported,
    ];

    #[test]
    fn terminal_states_are_absorbing() {
        for state in [
            UnitState::BuildFailed,
            UnitState::RunFailed,
            UnitState::Exported,
        ] {
            assert!(state.is_terminal());
            for next in ALL_STATES {
                assert!(!state.can_transition_to(next), "{state:?} -> {next:?}");
            }
        }
        assert!(!UnitState::RunOk.is_terminal());
    }

    #[test]
    fn failed_build_cannot_run() {
        let fx = fixture();
        let mut u = unit(&fx);
        u.mark_build_pending().expect("pending");
        u.record_build(false).expect("recorded");
        assert!(matches!(u.run(), Err(RunFailure::NotBuilt)));
        assert!(u.mark_run_pending().is_err());
        assert_eq!(u.state(), UnitState::BuildFailed);
    }

    #[test]
    fn build_outcome_recorded_once() {
        let fx = fixture();
        let mut u = unit(&fx);
        u.mark_build_pending().expect("pending");
        u.record_build(true).expect("recorded");
        let err = u.record_build(false).expect_err("second record");
        assert_eq!(err.from, UnitState::BuiltOk);
        assert_eq!(u.state(), UnitState::BuiltOk);
    }

    #[test]
    fn partial_results_count_as_failure() {
        let fx = fixture();
        let mut u = unit(&fx);
        u.mark_build_pending().expect("pending");
        u.record_build(true).expect("built");
        u.mark_run_pending().expect("run pending");
        u.record_run(Ok(full_results(&fx.config.sizes[..1])))
            .expect("recorded");
        assert_eq!(u.state(), UnitState::RunFailed);
        assert!(u.results().is_none());
        assert!(u.export().is_err());
    }

    #[test]
    fn successful_run_exports_once() {
        let fx = fixture();
        fs::create_dir_all(&fx.config.results_dir).expect("results dir");
        let mut u = unit(&fx);
        u.mark_build_pending().expect("pending");
        u.record_build(true).expect("built");
        u.mark_run_pending().expect("run pending");
        u.record_run(Ok(full_results(&fx.config.sizes)))
            .expect("recorded");
        assert_eq!(u.state(), UnitState::RunOk);

        u.export().expect("export");
        assert_eq!(u.state(), UnitState::Exported);
        let text = fs::read_to_string(u.result_file()).expect("result file");
        assert_eq!(text.lines().count(), 1 + fx.config.sizes.len());
        assert!(matches!(u.export(), Err(ExportError::Transition(_))));
    }

    #[test]
    fn export_failure_keeps_run_ok() {
        let fx = fixture();
        let mut u = unit(&fx);
        u.mark_build_pending().expect("pending");
        u.record_build(true).expect("built");
        u.mark_run_pending().expect("run pending");
        u.record_run(Ok(full_results(&fx.config.sizes)))
            .expect("recorded");
        // Results directory was never created.
        assert!(matches!(u.export(), Err(ExportError::Csv { .. })));
        assert_eq!(u.state(), UnitState::RunOk);
    }
}
