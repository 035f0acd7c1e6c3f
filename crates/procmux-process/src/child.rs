//! Native child process control

use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tracing::{debug, warn};

use crate::error::{ProcessError, Result};
use crate::launcher::ProcessControl;

/// SIGKILL escalation timeout
const SIGKILL_TIMEOUT_MS: u64 = 200;

/// [`ProcessControl`] over a `tokio::process::Child`
#[derive(Debug)]
pub struct NativeChild {
    /// Underlying tokio child process
    child: Child,
    /// Process ID
    pid: u32,
}

impl NativeChild {
    pub(crate) fn new(child: Child, pid: u32) -> Self {
        Self { child, pid }
    }

    /// Process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill process tree (process and all descendants)
    ///
    /// - Windows: Uses `taskkill /pid <pid> /f /t`
    /// - Unix: Signals the process group with SIGTERM, then SIGKILL
    async fn kill_tree(&mut self) -> Result<()> {
        debug!(pid = %self.pid, "Killing process tree");

        #[cfg(windows)]
        {
            use tokio::process::Command;

            let status = Command::new("taskkill")
                .args(["/pid", &self.pid.to_string(), "/f", "/t"])
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await;

            if !matches!(status, Ok(s) if s.success()) {
                warn!(pid = %self.pid, "taskkill failed, killing process only");
                self.child
                    .start_kill()
                    .map_err(|e| ProcessError::KillFailed(e.to_string()))?;
            }
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(self.pid as i32);

            if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                warn!(pid = %self.pid, error = %e, "Failed to send SIGTERM, killing process only");
                return self
                    .child
                    .start_kill()
                    .map_err(|e| ProcessError::KillFailed(e.to_string()));
            }

            let grace = Duration::from_millis(SIGKILL_TIMEOUT_MS);
            if tokio::time::timeout(grace, self.child.wait()).await.is_ok() {
                debug!(pid = %self.pid, "Process group exited after SIGTERM");
                return Ok(());
            }

            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) => debug!(pid = %self.pid, "Sent SIGKILL to process group"),
                Err(e) => {
                    warn!(pid = %self.pid, error = %e, "Failed to send SIGKILL, killing process only");
                    self.child
                        .start_kill()
                        .map_err(|e| ProcessError::KillFailed(e.to_string()))?;
                }
            }
        }

        #[allow(unreachable_code)]
        Ok(())
    }
}

#[async_trait]
impl ProcessControl for NativeChild {
    async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await.map_err(|e| ProcessError::Crashed {
            reason: e.to_string(),
        })?;
        Ok(exit_code(status))
    }

    async fn kill(&mut self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        self.kill_tree().await
    }
}

/// Exit code for a finished process
///
/// On Unix a signal-terminated process reports `128 + signal`, matching
/// shell conventions.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
