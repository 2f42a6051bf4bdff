//! Structured external-process invocation.
//!
//! Every external tool (build tool, emulator) is described by a
//! [`CommandSpec`] rather than a shell string, and run through [`run`],
//! which gives all call sites the same semantics:
//!
//! - the child runs in its own process group. The group is killed once the
//!   leader exits or the deadline passes, so no grandchild in it outlives
//!   the invocation;
//! - stdout and stderr are drained on helper threads and returned to the
//!   caller for diagnostics. Draining shares the deadline: pipes still held
//!   open by an escaped descendant when it passes make the run a timeout;
//! - the child is reaped with `wait4`, which reports user and system CPU
//!   time for exactly that child. Concurrent siblings started by other
//!   workers in the same process do not leak into the figure.
//! - environment overrides apply to the child only; the parent environment
//!   is never mutated.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Upper bound on the sleep between two non-blocking reap attempts.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Time past the deadline allowed for readers to hand over what a child
/// wrote just before it exited or was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// A program, its argument vector, and how to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    timeout: Duration,
}

impl CommandSpec {
    /// Creates a spec for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            timeout,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Sets the child's working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Sets an environment variable for the child only.
    #[must_use]
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Prepends `dir` to the child's `PATH`, leaving the parent's untouched.
    ///
    /// # Errors
    ///
    /// Fails when `dir` contains the path-list separator.
    pub fn with_path_prefix(self, dir: &Path) -> Result<Self, env::JoinPathsError> {
        let mut paths = vec![dir.to_path_buf()];
        if let Some(current) = env::var_os("PATH") {
            paths.extend(env::split_paths(&current));
        }
        let joined = env::join_paths(paths)?;
        Ok(self.env("PATH", joined))
    }

    /// Arguments, excluding the program.
    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Bytes captured from the child's standard streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Everything written to stdout.
    pub stdout: Vec<u8>,
    /// Everything written to stderr.
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    /// Stdout decoded lossily.
    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily.
    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// A child that ran to completion with a zero exit status.
#[derive(Debug, Clone)]
pub struct Completed {
    /// Captured streams.
    pub output: CapturedOutput,
    /// User plus system CPU time consumed by the child.
    pub cpu_time: Duration,
    /// Wall-clock time from spawn to reap.
    pub wall_time: Duration,
}

/// Why an external process did not complete successfully.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started.
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        /// Rendered command line.
        command: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Waiting for the child failed.
    #[error("failed waiting for `{command}`: {source}")]
    Wait {
        /// Rendered command line.
        command: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The child exceeded its timeout and was killed.
    #[error("`{command}` timed out after {:.1}s", timeout.as_secs_f64())]
    TimedOut {
        /// Rendered command line.
        command: String,
        /// The timeout that expired.
        timeout: Duration,
        /// Streams captured before the kill.
        output: CapturedOutput,
    },
    /// The child exited unsuccessfully.
    #[error("`{command}` failed: {status}")]
    Failed {
        /// Rendered command line.
        command: String,
        /// Exit status.
        status: ExitStatus,
        /// Captured streams.
        output: CapturedOutput,
    },
}

impl ProcessError {
    /// Captured streams, when the child got far enough to produce any.
    #[must_use]
    pub const fn output(&self) -> Option<&CapturedOutput> {
        match self {
            Self::TimedOut { output, .. } | Self::Failed { output, .. } => Some(output),
            Self::Spawn { .. } | Self::Wait { .. } => None,
        }
    }

    /// Returns `true` if the child was killed for exceeding its timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Logs the rendered command and captured streams at debug level.
    pub fn log_diagnostics(&self) {
        let command = match self {
            Self::Spawn { command, .. }
            | Self::Wait { command, .. }
            | Self::TimedOut { command, .. }
            | Self::Failed { command, .. } => command,
        };
        tracing::debug!(%command, "failed command");
        if let Some(output) = self.output() {
            tracing::debug!(stdout = %output.stdout_lossy(), stderr = %output.stderr_lossy());
        }
    }
}

enum Reaped {
    Exited { status: ExitStatus, cpu: Duration },
    TimedOut,
}

/// Runs `spec` to completion or until its timeout expires.
///
/// The deadline covers both the child and the draining of its pipes, so a
/// descendant that escaped the process group while holding stdout or stderr
/// open cannot stall the caller past the timeout.
///
/// # Errors
///
/// Returns [`ProcessError`] on spawn failure, wait failure, timeout, or a
/// non-zero exit status.
pub fn run(spec: &CommandSpec) -> Result<Completed, ProcessError> {
    let command = spec.to_string();
    let started = Instant::now();
    let deadline = started + spec.timeout;
    let mut child = spec
        .to_command()
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            command: command.clone(),
            source,
        })?;

    let (tx, rx) = mpsc::channel();
    let readers = usize::from(drain(child.stdout.take(), Stream::Stdout, &tx))
        + usize::from(drain(child.stderr.take(), Stream::Stderr, &tx));
    drop(tx);

    let reaped = libc::pid_t::try_from(child.id())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        .and_then(|pid| wait_with_deadline(pid, deadline));
    // Readers are detached on a wait failure: the child may still hold the
    // pipes open.
    let reaped = reaped.map_err(|source| ProcessError::Wait {
        command: command.clone(),
        source,
    })?;

    let (output, drained) = collect(&rx, readers, deadline + DRAIN_GRACE);
    let wall_time = started.elapsed();

    match reaped {
        Reaped::TimedOut => Err(ProcessError::TimedOut {
            command,
            timeout: spec.timeout,
            output,
        }),
        Reaped::Exited { .. } if !drained => {
            tracing::debug!(%command, "pipes still open at deadline");
            Err(ProcessError::TimedOut {
                command,
                timeout: spec.timeout,
                output,
            })
        }
        Reaped::Exited { status, .. } if !status.success() => Err(ProcessError::Failed {
            command,
            status,
            output,
        }),
        Reaped::Exited { cpu, .. } => Ok(Completed {
            output,
            cpu_time: cpu,
            wall_time,
        }),
    }
}

/// Waits for the group leader `pid` until `deadline`.
///
/// Whether the leader exits or times out, the group is killed while the
/// leader is still an unreaped zombie, so the group id cannot be recycled
/// and no straggler in the group keeps the pipes open.
fn wait_with_deadline(pid: libc::pid_t, deadline: Instant) -> io::Result<Reaped> {
    let mut interval = Duration::from_millis(1);
    loop {
        if sys::has_exited(pid)? {
            sys::kill_group(pid);
            return match sys::reap(pid, true)? {
                Some((status, cpu)) => Ok(Reaped::Exited { status, cpu }),
                None => Err(io::Error::other("child vanished before it was reaped")),
            };
        }
        let now = Instant::now();
        if now >= deadline {
            sys::kill_group(pid);
            sys::reap(pid, true)?;
            return Ok(Reaped::TimedOut);
        }
        thread::sleep(interval.min(deadline - now));
        interval = (interval * 2).min(MAX_POLL_INTERVAL);
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Starts a reader for `pipe`. Returns `false` when there is no pipe.
fn drain<R>(pipe: Option<R>, stream: Stream, tx: &Sender<(Stream, Vec<u8>)>) -> bool
where
    R: Read + Send + 'static,
{
    let Some(mut pipe) = pipe else {
        return false;
    };
    let tx = tx.clone();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            tracing::trace!(error = %e, "short read from child pipe");
        }
        // The receiver is gone once the caller gave up at the deadline.
        let _ = tx.send((stream, buf));
    });
    true
}

/// Gathers reader results until all `readers` report or `deadline` passes.
/// The flag is `false` when a reader was still blocked at the deadline.
fn collect(
    rx: &Receiver<(Stream, Vec<u8>)>,
    readers: usize,
    deadline: Instant,
) -> (CapturedOutput, bool) {
    let mut output = CapturedOutput::default();
    for _ in 0..readers {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((Stream::Stdout, buf)) => output.stdout = buf,
            Ok((Stream::Stderr, buf)) => output.stderr = buf,
            Err(RecvTimeoutError::Timeout) => return (output, false),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    (output, true)
}

#[allow(unsafe_code)]
mod sys {
    use std::io;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::time::Duration;

    /// Reaps `pid`, returning its exit status and CPU time, or `None` if it
    /// is still running and `block` is false.
    pub(super) fn reap(
        pid: libc::pid_t,
        block: bool,
    ) -> io::Result<Option<(ExitStatus, Duration)>> {
        let options = if block { 0 } else { libc::WNOHANG };
        loop {
            let mut status: libc::c_int = 0;
            // SAFETY: rusage is plain old data; all-zero bytes are a valid value.
            let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
            // SAFETY: both out-pointers refer to locals that live for the call.
            let ret = unsafe { libc::wait4(pid, &mut status, options, &mut usage) };
            if ret == pid {
                let cpu = timeval(usage.ru_utime) + timeval(usage.ru_stime);
                return Ok(Some((ExitStatus::from_raw(status), cpu)));
            }
            if ret == 0 {
                return Ok(None);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Returns `true` once `pid` has exited, leaving it unreaped.
    pub(super) fn has_exited(pid: libc::pid_t) -> io::Result<bool> {
        let id = libc::id_t::try_from(pid)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        loop {
            // SAFETY: siginfo_t is plain old data; all-zero bytes are a valid value.
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            // SAFETY: `info` is a local that lives for the call.
            let ret = unsafe {
                libc::waitid(
                    libc::P_PID,
                    id,
                    &mut info,
                    libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
                )
            };
            if ret == 0 {
                // With WNOHANG and no state change the kernel leaves the
                // record zeroed.
                return Ok(info.si_signo == libc::SIGCHLD);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Sends `SIGKILL` to the process group led by `pid`.
    pub(super) fn kill_group(pid: libc::pid_t) {
        // SAFETY: killpg has no memory-safety preconditions. The group leader
        // has not been reaped yet, so its id cannot have been recycled.
        let ret = unsafe { libc::killpg(pid, libc::SIGKILL) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::debug!(pid, error = %err, "killpg failed");
            }
        }
    }

    fn timeval(tv: libc::timeval) -> Duration {
        let secs = u64::try_from(tv.tv_sec).unwrap_or(0);
        let micros = u64::try_from(tv.tv_usec).unwrap_or(0);
        Duration::from_secs(secs) + Duration::from_micros(micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> CommandSpec {
        CommandSpec::new("/bin/sh", timeout).arg("-c").arg(script)
    }

    #[test]
    fn captures_stdout_on_success() {
        let done = run(&sh("echo hello; echo oops >&2", Duration::from_secs(10)))
            .expect("sh should succeed");
        assert_eq!(done.output.stdout_lossy(), "hello\n");
        assert_eq!(done.output.stderr_lossy(), "oops\n");
    }

    #[test]
    fn nonzero_exit_is_failure_with_output() {
        let err = run(&sh("echo partial; exit 3", Duration::from_secs(10)))
            .expect_err("exit 3 should fail");
        match err {
            ProcessError::Failed { status, output, .. } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(output.stdout_lossy(), "partial\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn timeout_kills_the_whole_group() {
        let started = Instant::now();
        let err = run(&sh("sleep 30 & sleep 30", Duration::from_millis(200)))
            .expect_err("sleep should time out");
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn background_job_is_killed_with_its_leader() {
        let started = Instant::now();
        let done = run(&sh("sleep 8 & echo started; exit 0", Duration::from_secs(4)))
            .expect("leader exits cleanly");
        assert_eq!(done.output.stdout_lossy(), "started\n");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn escaped_descendant_holding_pipes_times_out() {
        let Some(setsid) = ["/usr/bin/setsid", "/bin/setsid"]
            .into_iter()
            .find(|p| Path::new(p).is_file())
        else {
            return;
        };
        let started = Instant::now();
        let err = run(&sh(
            &format!("{setsid} sleep 8 & exit 0"),
            Duration::from_millis(300),
        ))
        .expect_err("open pipes should hit the deadline");
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = run(&CommandSpec::new(
            "/nonexistent/definitely-not-here",
            Duration::from_secs(1),
        ))
        .expect_err("spawn should fail");
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(err.output().is_none());
    }

    #[test]
    fn env_overrides_reach_only_the_child() {
        let done = run(&sh("printf %s \"$BENCH_CORE_PROBE\"", Duration::from_secs(10))
            .env("BENCH_CORE_PROBE", "set-for-child"))
        .expect("sh should succeed");
        assert_eq!(done.output.stdout_lossy(), "set-for-child");
        assert!(env::var_os("BENCH_CORE_PROBE").is_none());
    }

    #[test]
    fn path_prefix_is_searched_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = sh("printf %s \"$PATH\"", Duration::from_secs(10))
            .with_path_prefix(dir.path())
            .expect("path joins");
        let done = run(&spec).expect("sh should succeed");
        let path = done.output.stdout_lossy();
        assert!(path.starts_with(&*dir.path().to_string_lossy()));
    }

    #[test]
    fn busy_child_reports_cpu_time() {
        let script = "i=0; while [ $i -lt 300000 ]; do i=$((i+1)); done";
        let done = run(&sh(script, Duration::from_secs(60))).expect("loop should finish");
        assert!(done.cpu_time > Duration::ZERO);
        assert!(done.wall_time >= done.cpu_time / 4);
    }

    #[test]
    fn display_renders_argv() {
        let spec = CommandSpec::new("make", Duration::from_secs(1))
            .args(["BENCHMARK=memcpy", "LMUL=2"])
            .current_dir("/tmp");
        assert_eq!(spec.to_string(), "make BENCHMARK=memcpy LMUL=2");
        assert_eq!(spec.arguments().len(), 2);
    }
}
