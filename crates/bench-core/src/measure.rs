//! External measurement runner: one instrumented emulator execution per
//! `(size, iterations)` pair.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::emulator::EmulatorInstall;
use crate::error::RunFailure;
use crate::process::{self, CommandSpec};
use crate::sample::{CalibrationAnomaly, Measurement};

/// Line pattern the instruction-count plugin writes to the trace.
pub const ICOUNT_PATTERN: &str = "total insns: ";

/// Prefix of the per-run trace temporary file.
pub const TRACE_PREFIX: &str = "icount-";

/// Something that can run the benchmark once at a given size.
///
/// The emulator-backed implementation is [`EmulatorRunner`]; the calibrator
/// only depends on this trait.
pub trait Executor {
    /// Runs `iterations` iterations at `size` and returns the totals.
    ///
    /// # Errors
    ///
    /// Any failure aborts the current sample.
    fn execute(&self, size: u64, iterations: u64) -> Result<Measurement, RunFailure>;
}

/// Instruction count extracted from a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceCount {
    /// Value from the last matching line.
    pub icount: u64,
    /// Number of matching lines.
    pub matches: usize,
}

/// Scans trace text for `total insns: <n>` and keeps the last occurrence.
#[must_use]
pub fn parse_icount(trace: &str) -> Option<TraceCount> {
    let mut found: Option<TraceCount> = None;
    for line in trace.lines() {
        let Some(start) = line.find(ICOUNT_PATTERN) else {
            continue;
        };
        let digits: &str = {
            let rest = &line[start + ICOUNT_PATTERN.len()..];
            let end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            &rest[..end]
        };
        if let Ok(icount) = digits.parse::<u64>() {
            let matches = found.map_or(0, |f| f.matches) + 1;
            found = Some(TraceCount { icount, matches });
        }
    }
    found
}

/// Runs a built benchmark executable under the instrumented emulator.
#[derive(Debug, Clone)]
pub struct EmulatorRunner<'a> {
    /// Emulator install to run under.
    pub emulator: &'a EmulatorInstall,
    /// Workspace used as working directory and trace location.
    pub workspace: &'a Path,
    /// Benchmark executable.
    pub executable: &'a Path,
    /// Vector length handed to the emulated CPU.
    pub vlen: u32,
    /// Timeout for each emulator invocation.
    pub timeout: Duration,
}

impl EmulatorRunner<'_> {
    /// The structured emulator command writing its trace to `trace`.
    ///
    /// # Errors
    ///
    /// Fails if the emulator's `bin` directory cannot be joined into `PATH`.
    pub fn command(
        &self,
        trace: &Path,
        size: u64,
        iterations: u64,
    ) -> Result<CommandSpec, RunFailure> {
        let spec = CommandSpec::new(self.emulator.emulator_binary(), self.timeout)
            .current_dir(self.workspace)
            .arg("-cpu")
            .arg(format!("rv64,v=true,vlen={}", self.vlen))
            .args(["-d", "plugin", "-plugin"])
            .arg(format!("{},inline=on", self.emulator.plugin().display()))
            .arg("-D")
            .arg(trace)
            .arg(self.executable)
            .arg(size.to_string())
            .arg(iterations.to_string())
            .with_path_prefix(&self.emulator.bin_dir())?;
        Ok(spec)
    }

    fn read_trace(path: &Path) -> Result<u64, RunFailure> {
        let text = fs::read_to_string(path).map_err(|source| RunFailure::TraceRead {
            path: path.to_path_buf(),
            source,
        })?;
        let count = parse_icount(&text).ok_or_else(|| RunFailure::TraceMissingCount {
            path: path.to_path_buf(),
        })?;
        if count.matches > 1 {
            CalibrationAnomaly::MultipleTraceMatches {
                matches: count.matches,
            }
            .warn();
        }
        Ok(count.icount)
    }
}

impl Executor for EmulatorRunner<'_> {
    fn execute(&self, size: u64, iterations: u64) -> Result<Measurement, RunFailure> {
        // Removed on drop, whichever way this function returns.
        let trace = tempfile::Builder::new()
            .prefix(TRACE_PREFIX)
            .tempfile_in(self.workspace)
            .map_err(RunFailure::TraceFile)?;
        let trace_path: PathBuf = trace.path().to_path_buf();

        let spec = self.command(&trace_path, size, iterations)?;
        tracing::trace!(command = %spec, "measuring");
        let done = process::run(&spec).map_err(|source| {
            if source.is_timeout() {
                tracing::warn!(size, iterations, "benchmark run timed out");
            } else {
                tracing::warn!(size, iterations, error = %source, "benchmark run failed");
            }
            source.log_diagnostics();
            RunFailure::Process {
                size,
                iterations,
                source,
            }
        })?;

        let icount = Self::read_trace(&trace_path)?;
        Ok(Measurement {
            time: done.cpu_time.as_secs_f64(),
            icount,
        })
    }
}
