use std::ffi::OsStr;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::backoff::Backoff;
use crate::error::ProcessError;

type Result<T> = std::result::Result<T, ProcessError>;

/// Launches the remote renderer.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    inherit_output: bool,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the child write to this process's stdout/stderr instead of null.
    pub fn with_inherited_output(mut self, inherit: bool) -> Self {
        self.inherit_output = inherit;
        self
    }

    /// Start `path` with `args`. Spawn failures are reported here, never later.
    pub fn launch<I, S>(&self, path: impl AsRef<Path>, args: I) -> Result<ChildProcess>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let path = path.as_ref();
        let mut command = Command::new(path);
        command.args(args).stdin(Stdio::null());
        if self.inherit_output {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = command.spawn().map_err(|source| ProcessError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(pid = child.id(), path = %path.display(), "launched remote process");
        Ok(ChildProcess {
            child,
            exit: None,
        })
    }
}

/// How [`ChildProcess::stop`] ended the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited on its own within the grace period (exit code if it had one).
    Exited(Option<i32>),
    /// Had to be killed.
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Code(Option<i32>),
    Killed,
}

/// A launched remote process. Dropping it kills the process if it is
/// still running.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    exit: Option<Exit>,
}

impl ChildProcess {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking liveness check. Reaps the child once it has exited.
    pub fn is_running(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(Exit::Code(status.code()));
                tracing::debug!(pid = self.pid(), code = ?status.code(), "remote process exited");
                false
            }
            Ok(None) => true,
            Err(err) => {
                tracing::warn!(pid = self.pid(), error = %err, "cannot query remote process");
                false
            }
        }
    }

    /// Exit code once the process has exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self.exit {
            Some(Exit::Code(code)) => code,
            _ => None,
        }
    }

    /// Wait up to `timeout` for the process to exit. Returns true if it did.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(20));
        loop {
            if !self.is_running() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            backoff.idle(remaining);
        }
    }

    /// Forcefully kill and reap the process. A no-op once it has exited.
    pub fn terminate(&mut self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => {}
            // Exited between the check and the kill.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(err) => return Err(err.into()),
        }
        self.child.wait()?;
        self.exit = Some(Exit::Killed);
        tracing::warn!(pid = self.pid(), "remote process killed");
        Ok(())
    }

    /// Give the process `grace` to exit on its own, then kill it.
    pub fn stop(&mut self, grace: Duration) -> Result<StopOutcome> {
        if self.wait_for_exit(grace) {
            return Ok(match self.exit {
                Some(Exit::Killed) => StopOutcome::Killed,
                _ => StopOutcome::Exited(self.exit_code()),
            });
        }
        self.terminate()?;
        Ok(StopOutcome::Killed)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            tracing::warn!(pid = self.pid(), error = %err, "failed to kill remote process");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ChildProcess {
        ProcessSupervisor::new()
            .launch("/bin/sh", ["-c", script])
            .expect("sh should launch")
    }

    #[test]
    fn missing_executable_fails_synchronously() {
        let err = ProcessSupervisor::new()
            .launch("/nonexistent/osrlink-renderer", Vec::<&str>::new())
            .expect_err("launch should fail");
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn exit_code_is_recorded() {
        let mut child = sh("exit 3");
        assert!(child.wait_for_exit(Duration::from_secs(5)));
        assert!(!child.is_running());
        assert_eq!(child.exit_code(), Some(3));
    }

    #[test]
    fn wait_for_exit_times_out_on_live_process() {
        let mut child = sh("sleep 5");
        assert!(child.is_running());
        assert!(!child.wait_for_exit(Duration::from_millis(30)));
        child.terminate().expect("terminate");
        assert!(!child.is_running());
        assert_eq!(child.exit_code(), None);
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut child = sh("sleep 5");
        child.terminate().expect("first terminate");
        child.terminate().expect("second terminate");
    }

    #[test]
    fn stop_prefers_graceful_exit() {
        let mut child = sh("exit 0");
        assert_eq!(
            child.stop(Duration::from_secs(5)).expect("stop"),
            StopOutcome::Exited(Some(0))
        );
    }

    #[test]
    fn stop_kills_after_grace() {
        let mut child = sh("sleep 5");
        let start = Instant::now();
        assert_eq!(
            child.stop(Duration::from_millis(50)).expect("stop"),
            StopOutcome::Killed
        );
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn drop_kills_running_child() {
        let child = sh("sleep 30");
        let proc_entry = format!("/proc/{}", child.pid());
        drop(child);
        assert!(!std::path::Path::new(&proc_entry).exists());
    }
}
