//! PTY launcher built on portable-pty

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use portable_pty::{native_pty_system, CommandBuilder};
use procmux_process::launcher::{INPUT_CHANNEL_CAPACITY, READ_BUFFER_SIZE};
use procmux_process::{LaunchedProcess, ProcessConfig, ProcessError, ProcessLauncher, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::session::{pty_size, wait_exit_code, PtyChild, PtyTerminal};

/// Raw pty reads queued between the master and the managed process
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Default terminal type exported to pty children
const DEFAULT_TERM: &str = "xterm-256color";

/// Spawns commands attached to a pseudo-terminal
///
/// The terminal size comes from [`ProcessConfig::size`], defaulting to
/// 24x80. `TERM` is set to `xterm-256color` unless the config overrides it.
#[derive(Debug, Clone, Default)]
pub struct PtyLauncher;

impl PtyLauncher {
    /// Create new pty launcher
    pub fn new() -> Self {
        Self
    }

    fn command(config: &ProcessConfig) -> Result<CommandBuilder> {
        let mut cmd = CommandBuilder::new(&config.command);
        cmd.args(&config.args);

        let cwd = match config.cwd {
            Some(ref dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        cmd.cwd(cwd);

        if !config.env.contains_key("TERM") {
            cmd.env("TERM", DEFAULT_TERM);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        Ok(cmd)
    }
}

#[async_trait]
impl ProcessLauncher for PtyLauncher {
    async fn launch(&self, config: &ProcessConfig) -> Result<LaunchedProcess> {
        let size = config.size.unwrap_or_default();
        debug!(
            command = %config.command,
            args = ?config.args,
            rows = size.rows,
            cols = size.cols,
            "Spawning pty process"
        );

        let cmd = Self::command(config)?;
        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| ProcessError::Pty(format!("failed to open pty: {}", e)))?;

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            ProcessError::SpawnFailed(std::io::Error::new(
                ErrorKind::NotFound,
                format!("{}: {}", config.command, e),
            ))
        })?;
        // The master only sees end-of-stream once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ProcessError::Pty(format!("failed to clone pty reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ProcessError::Pty(format!("failed to take pty writer: {}", e)))?;

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        tokio::task::spawn_blocking(move || read_master(reader, output_tx, pid));

        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        tokio::task::spawn_blocking(move || write_master(writer, input_rx, pid));

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let _ = exit_tx.send(wait_exit_code(child.as_mut(), pid));
        });

        info!(pid = ?pid, command = %config.command, "PTY process spawned");

        Ok(LaunchedProcess {
            pid,
            output: output_rx,
            input: input_tx,
            control: Box::new(PtyChild::new(pid, exit_rx, killer)),
            terminal: Some(Arc::new(PtyTerminal::new(pair.master))),
        })
    }

    fn name(&self) -> &'static str {
        "pty"
    }
}

fn read_master(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>, pid: Option<u32>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            // Linux reports EIO once the slave side is gone.
            Err(e) => {
                debug!(pid = ?pid, error = %e, "PTY read ended");
                break;
            }
        }
    }
    debug!(pid = ?pid, "PTY output closed");
}

fn write_master(mut writer: Box<dyn Write + Send>, mut rx: mpsc::Receiver<Vec<u8>>, pid: Option<u32>) {
    while let Some(bytes) = rx.blocking_recv() {
        if let Err(e) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
            warn!(pid = ?pid, error = %e, "Failed to write to pty");
            break;
        }
    }
}
