//! External build runner: one build-tool invocation per configuration unit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::identity::{Benchmark, VectorConfig};
use crate::process::{self, CommandSpec};

/// Preprocessor definition selecting the standard-library implementation.
pub const STANDARD_LIB_DEF: &str = "-DSTANDARD_LIB";

/// Preprocessor definition compiling in result verification.
pub const VERIFY_DEF: &str = "-DVERIF";

/// Inputs to one build-tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest<'a> {
    /// Build tool program.
    pub make_program: &'a Path,
    /// Workspace the build runs in.
    pub workspace: &'a Path,
    /// Library source directory for routine symbols.
    pub library_src_dir: &'a Path,
    /// Routine to build.
    pub benchmark: Benchmark,
    /// Vector or scalar configuration.
    pub config: VectorConfig,
    /// Compile in verification code.
    pub verify: bool,
    /// Timeout for the whole build.
    pub timeout: Duration,
}

impl BuildRequest<'_> {
    /// Path of the executable the build produces.
    #[must_use]
    pub fn executable(&self) -> PathBuf {
        executable_path(self.workspace, self.benchmark)
    }

    /// Space-joined extra definitions.
    #[must_use]
    pub fn extra_defs(&self) -> String {
        let mut defs = Vec::with_capacity(2);
        if self.config.is_scalar() {
            defs.push(STANDARD_LIB_DEF);
        }
        if self.verify {
            defs.push(VERIFY_DEF);
        }
        defs.join(" ")
    }

    /// The structured command for this build.
    #[must_use]
    pub fn command(&self) -> CommandSpec {
        let mut spec = CommandSpec::new(self.make_program, self.timeout)
            .current_dir(self.workspace)
            .arg(format!("BENCHMARK={}", self.benchmark))
            .arg(format!("SIFIVESRCDIR={}", self.library_src_dir.display()));
        if let VectorConfig::Vector { lmul, .. } = self.config {
            spec = spec.arg(format!("LMUL={lmul}"));
        }
        spec.arg(format!("EXTRA_DEFS={}", self.extra_defs()))
    }
}

/// Deterministic executable location inside a workspace.
#[must_use]
pub fn executable_path(workspace: &Path, benchmark: Benchmark) -> PathBuf {
    workspace.join(format!("benchmark-{benchmark}.exe"))
}

/// Runs the build and reports success.
///
/// Failures (spawn error, timeout, non-zero exit) are logged with the
/// captured output and reported as `false`; nothing propagates further.
#[must_use]
pub fn run_build(request: &BuildRequest<'_>) -> bool {
    let spec = request.command();
    tracing::debug!(command = %spec, "building");
    match process::run(&spec) {
        Ok(done) => {
            tracing::debug!(output = %done.output.stdout_lossy(), "build finished");
            true
        }
        Err(err) => {
            if err.is_timeout() {
                tracing::error!("benchmark build timed out");
            } else {
                tracing::error!(error = %err, "benchmark build failed");
            }
            err.log_diagnostics();
            false
        }
    }
}
