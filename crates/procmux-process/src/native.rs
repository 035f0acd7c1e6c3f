//! Native process backend built on `tokio::process`

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    child::NativeChild,
    config::ProcessConfig,
    error::{ProcessError, Result},
    launcher::{LaunchedProcess, ProcessLauncher, INPUT_CHANNEL_CAPACITY, READ_BUFFER_SIZE},
};

/// Raw output reads queued between the pipes and the managed process
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Spawns plain child processes with piped stdio
///
/// stdout and stderr are merged into one output stream. On Unix the child
/// leads its own process group so the whole tree can be signalled.
#[derive(Debug, Clone, Default)]
pub struct NativeLauncher;

impl NativeLauncher {
    /// Create new native launcher
    pub fn new() -> Self {
        Self
    }

    fn command(config: &ProcessConfig) -> Command {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);

        if let Some(ref dir) = config.cwd {
            cmd.current_dir(dir);
        }

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

#[async_trait]
impl ProcessLauncher for NativeLauncher {
    /// Spawn a process
    ///
    /// # Examples
    /// ```no_run
    /// use procmux_process::{NativeLauncher, ProcessConfig, ProcessLauncher};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let launched = NativeLauncher::new()
    ///     .launch(&ProcessConfig::new("echo").args(["hello"]))
    ///     .await?;
    /// assert!(launched.pid.is_some());
    /// # Ok(())
    /// # }
    /// ```
    async fn launch(&self, config: &ProcessConfig) -> Result<LaunchedProcess> {
        debug!(
            command = %config.command,
            args = ?config.args,
            "Spawning process"
        );

        let mut child = Self::command(config).spawn()?;
        let pid = child.id().ok_or_else(|| {
            ProcessError::SpawnFailed(std::io::Error::new(
                std::io::ErrorKind::Other,
                "Failed to get process ID",
            ))
        })?;

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_output(stdout, output_tx.clone(), pid, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_output(stderr, output_tx, pid, "stderr"));
        }

        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(pump_input(stdin, input_rx, pid));
        }

        info!(pid = %pid, command = %config.command, "Process spawned");

        Ok(LaunchedProcess {
            pid: Some(pid),
            output: output_rx,
            input: input_tx,
            control: Box::new(NativeChild::new(child, pid)),
            terminal: None,
        })
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

async fn pump_output<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>, pid: u32, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(pid = %pid, stream, error = %e, "Output read failed");
                break;
            }
        }
    }
    debug!(pid = %pid, stream, "Output stream closed");
}

async fn pump_input(mut stdin: ChildStdin, mut rx: mpsc::Receiver<Vec<u8>>, pid: u32) {
    while let Some(bytes) = rx.recv().await {
        let written = async {
            stdin.write_all(&bytes).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!(pid = %pid, error = %e, "Failed to write to stdin");
            break;
        }
    }
}
