//! Process construction capability
//!
//! A launcher turns a [`ProcessConfig`] into a live process and hands back
//! its byte streams, a [`ProcessControl`] for waiting and killing, and for
//! pty backends a [`TerminalControl`]. [`ManagedProcess`](crate::ManagedProcess)
//! only ever talks to these traits, so plain processes and pseudo-terminals
//! are interchangeable.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::{ProcessConfig, TerminalSize};
use crate::error::Result;

/// Capacity of the input channel handed to launched processes
pub const INPUT_CHANNEL_CAPACITY: usize = 128;

/// Size of a single raw read from process output
pub const READ_BUFFER_SIZE: usize = 8192;

/// A freshly spawned process
#[derive(Debug)]
pub struct LaunchedProcess {
    /// OS process ID, if known
    pub pid: Option<u32>,
    /// Raw output reads; the channel closes once all output reached end-of-stream
    pub output: mpsc::Receiver<Vec<u8>>,
    /// Bytes to deliver to the process input
    pub input: mpsc::Sender<Vec<u8>>,
    /// Exit and kill handle
    pub control: Box<dyn ProcessControl>,
    /// Terminal handle, present only for pty-backed processes
    pub terminal: Option<Arc<dyn TerminalControl>>,
}

/// Handle to the running process owned by a single waiter task
#[async_trait]
pub trait ProcessControl: Send + Sync + std::fmt::Debug {
    /// Wait for termination, returning the exit code
    ///
    /// Errors are runtime failures of the execution environment, not
    /// non-zero exit codes. Must be cancel-safe.
    async fn wait(&mut self) -> Result<i32>;

    /// Request termination of the process (and its descendants where possible)
    async fn kill(&mut self) -> Result<()>;
}

/// Terminal-side operations of a pty-backed process
pub trait TerminalControl: Send + Sync + std::fmt::Debug {
    /// Resize the terminal
    fn resize(&self, size: TerminalSize) -> Result<()>;
}

/// Something that can spawn processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Spawn a process for `config`
    async fn launch(&self, config: &ProcessConfig) -> Result<LaunchedProcess>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}
