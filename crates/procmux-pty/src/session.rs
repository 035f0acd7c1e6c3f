//! Control handles for a running PTY session

use std::fmt;
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use portable_pty::{Child, ChildKiller, MasterPty, PtySize};
use procmux_process::{ProcessControl, ProcessError, Result, TerminalControl, TerminalSize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Convert terminal dimensions to a portable-pty size
pub(crate) fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Block until the pty child exits and return its exit code
///
/// On Unix the child is reaped with `waitpid` so a signal-terminated session
/// reports `128 + signal`, the same as the native backend.
pub(crate) fn wait_exit_code(
    child: &mut (dyn Child + Send + Sync),
    pid: Option<u32>,
) -> io::Result<i32> {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            return wait_pid(pid);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    child.wait().map(|status| status.exit_code() as i32)
}

#[cfg(unix)]
fn wait_pid(pid: u32) -> io::Result<i32> {
    use nix::errno::Errno;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::Pid;

    loop {
        match waitpid(Pid::from_raw(pid as i32), None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(e) => return Err(io::Error::from(e)),
        }
    }
}

/// Exit and kill handle for a pty child
///
/// The blocking `wait` runs on the blocking pool from launch on and reports
/// through a oneshot, which keeps [`ProcessControl::wait`] cancel-safe.
pub struct PtyChild {
    pid: Option<u32>,
    exit: oneshot::Receiver<io::Result<i32>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    exit_code: Option<i32>,
}

impl PtyChild {
    pub(crate) fn new(
        pid: Option<u32>,
        exit: oneshot::Receiver<io::Result<i32>>,
        killer: Box<dyn ChildKiller + Send + Sync>,
    ) -> Self {
        Self {
            pid,
            exit,
            killer,
            exit_code: None,
        }
    }

    /// Process ID of the session leader
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl fmt::Debug for PtyChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtyChild")
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code)
            .finish()
    }
}

#[async_trait]
impl ProcessControl for PtyChild {
    async fn wait(&mut self) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }

        let code = match (&mut self.exit).await {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                return Err(ProcessError::Crashed {
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ProcessError::Crashed {
                    reason: "pty wait task ended without a status".to_string(),
                })
            }
        };

        self.exit_code = Some(code);
        Ok(code)
    }

    async fn kill(&mut self) -> Result<()> {
        if self.exit_code.is_some() {
            return Ok(());
        }
        debug!(pid = ?self.pid, "Killing pty child");
        self.killer
            .kill()
            .map_err(|e| ProcessError::KillFailed(e.to_string()))
    }
}

impl Drop for PtyChild {
    fn drop(&mut self) {
        if self.exit_code.is_none() {
            // Already-exited children make kill fail; nothing to release then.
            let _ = self.killer.kill();
        }
    }
}

/// Master side of a pty session, used for resizing
pub struct PtyTerminal {
    master: Mutex<Box<dyn MasterPty + Send>>,
}

impl PtyTerminal {
    pub(crate) fn new(master: Box<dyn MasterPty + Send>) -> Self {
        Self {
            master: Mutex::new(master),
        }
    }
}

impl fmt::Debug for PtyTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtyTerminal").finish_non_exhaustive()
    }
}

impl TerminalControl for PtyTerminal {
    fn resize(&self, size: TerminalSize) -> Result<()> {
        if size.rows == 0 || size.cols == 0 {
            return Err(ProcessError::InvalidConfig(format!(
                "terminal size must be non-zero, got {}x{}",
                size.rows, size.cols
            )));
        }

        let master = self
            .master
            .lock()
            .map_err(|_| ProcessError::Pty("pty master lock poisoned".to_string()))?;
        master.resize(pty_size(size)).map_err(|e| {
            warn!(error = %e, "Failed to resize pty");
            ProcessError::Pty(e.to_string())
        })?;

        debug!(rows = size.rows, cols = size.cols, "Resized pty");
        Ok(())
    }
}
