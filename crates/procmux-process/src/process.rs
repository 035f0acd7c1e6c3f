//! Managed process wrapper
//!
//! A [`ManagedProcess`] owns one spawned process or pty session and turns
//! its raw output into coalesced chunks. Lifecycle changes are published
//! through exit and error notifications; construction failures travel the
//! same path as runtime failures so holders of the handle react uniformly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::CoalescingBuffer;
use crate::config::{BufferConfig, ProcessConfig, ServiceConfig, TerminalSize};
use crate::emitter::Emitter;
use crate::error::{ProcessError, Result};
use crate::launcher::{LaunchedProcess, ProcessControl, ProcessLauncher, TerminalControl};
use crate::registry::ProcessId;

/// Lifecycle state of a managed process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessState {
    /// Construction requested, no OS handle yet
    Starting,
    /// The OS process exists
    Running,
    /// Terminated normally
    Exited {
        /// Exit code
        code: i32,
    },
    /// Construction or execution failed
    Failed {
        /// Error message
        reason: String,
    },
}

impl ProcessState {
    /// Whether the state is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Failed { .. })
    }
}

/// Where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The process or pty could not be spawned
    Construction,
    /// The process died from its execution environment
    Runtime,
}

/// Payload of the error notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessFailure {
    /// Failure category
    pub kind: FailureKind,
    /// Error message
    pub message: String,
}

impl ProcessFailure {
    fn from_error(kind: FailureKind, err: &ProcessError) -> Self {
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Point-in-time snapshot of a managed process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Registry identifier, if registered
    pub id: Option<ProcessId>,
    /// Program that was launched
    pub command: String,
    /// Program arguments
    pub args: Vec<String>,
    /// OS process ID while known
    pub pid: Option<u32>,
    /// Lifecycle state
    #[serde(flatten)]
    pub state: ProcessState,
    /// Whether the process runs attached to a pseudo-terminal
    pub terminal: bool,
}

#[derive(Debug)]
struct Lifecycle {
    state: ProcessState,
    pid: Option<u32>,
    last_error: Option<ProcessFailure>,
    /// A launcher call is in flight
    launching: bool,
}

/// Callback run once when the process reaches a terminal state or is
/// disposed, before any notification is published
struct TerminalHook(Box<dyn FnOnce() + Send>);

impl std::fmt::Debug for TerminalHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TerminalHook")
    }
}

/// Holds back terminal notifications until dropped
///
/// Lets a creator hand out the identifier before the exit of a short-lived
/// process can be observed.
#[derive(Debug)]
pub(crate) struct PublicationHold {
    process: Arc<ManagedProcess>,
}

impl Drop for PublicationHold {
    fn drop(&mut self) {
        self.process.publish.send_replace(true);
    }
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    output_drain: Duration,
    kill: Duration,
}

/// One externally spawned process or pseudo-terminal session
#[derive(Debug)]
pub struct ManagedProcess {
    config: ProcessConfig,
    id: OnceLock<ProcessId>,
    lifecycle: Mutex<Lifecycle>,
    buffer: CoalescingBuffer,
    exit: Emitter<i32>,
    errors: Emitter<ProcessFailure>,
    input: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    terminal: Mutex<Option<Arc<dyn TerminalControl>>>,
    cancel: CancellationToken,
    disposed: AtomicBool,
    released: watch::Sender<bool>,
    publish: watch::Sender<bool>,
    terminal_hook: Mutex<Option<TerminalHook>>,
    timeouts: Timeouts,
}

impl ManagedProcess {
    /// Create a process handle in the `Starting` state with default timeouts
    pub fn new(config: ProcessConfig, buffer: BufferConfig) -> Arc<Self> {
        Self::with_settings(
            config,
            &ServiceConfig {
                buffer,
                ..ServiceConfig::default()
            },
        )
    }

    /// Create a process handle using service-wide settings
    pub fn with_settings(config: ProcessConfig, settings: &ServiceConfig) -> Arc<Self> {
        let (released, _) = watch::channel(false);
        let (publish, _) = watch::channel(true);
        Arc::new(Self {
            config,
            id: OnceLock::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: ProcessState::Starting,
                pid: None,
                last_error: None,
                launching: false,
            }),
            buffer: CoalescingBuffer::new(settings.buffer),
            exit: Emitter::new(),
            errors: Emitter::new(),
            input: Mutex::new(None),
            terminal: Mutex::new(None),
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            released,
            publish,
            terminal_hook: Mutex::new(None),
            timeouts: Timeouts {
                output_drain: settings.output_drain_timeout(),
                kill: settings.kill_timeout(),
            },
        })
    }

    /// Registry identifier, once registered
    pub fn id(&self) -> Option<ProcessId> {
        self.id.get().copied()
    }

    pub(crate) fn assign_id(&self, id: ProcessId) -> bool {
        self.id.set(id).is_ok()
    }

    /// Install the callback run on exit, failure or disposal
    ///
    /// Runs immediately if one of those already happened.
    pub(crate) fn on_terminal(&self, hook: impl FnOnce() + Send + 'static) {
        *lock(&self.terminal_hook) = Some(TerminalHook(Box::new(hook)));
        if self.is_disposed() || self.state().is_terminal() {
            self.run_terminal_hook();
        }
    }

    fn run_terminal_hook(&self) {
        let hook = lock(&self.terminal_hook).take();
        if let Some(TerminalHook(hook)) = hook {
            hook();
        }
    }

    /// Delay exit and error notifications until the returned guard drops
    pub(crate) fn hold_publication(self: &Arc<Self>) -> PublicationHold {
        self.publish.send_replace(false);
        PublicationHold {
            process: Arc::clone(self),
        }
    }

    /// Launch parameters
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        self.lifecycle().state.clone()
    }

    /// OS process ID while known
    pub fn pid(&self) -> Option<u32> {
        self.lifecycle().pid
    }

    /// Exit code, present only after a normal exit
    pub fn exit_code(&self) -> Option<i32> {
        match self.lifecycle().state {
            ProcessState::Exited { code } => Some(code),
            _ => None,
        }
    }

    /// Most recent failure, if any
    pub fn last_error(&self) -> Option<ProcessFailure> {
        self.lifecycle().last_error.clone()
    }

    /// Snapshot of identity and lifecycle
    pub fn info(&self) -> ProcessInfo {
        let (pid, state) = {
            let lifecycle = self.lifecycle();
            (lifecycle.pid, lifecycle.state.clone())
        };
        ProcessInfo {
            id: self.id(),
            command: self.config.command.clone(),
            args: self.config.args.clone(),
            pid,
            state,
            terminal: lock(&self.terminal).is_some(),
        }
    }

    /// Whether `dispose` has been called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Exit notification: fires once with the exit code
    ///
    /// The stream ends after the terminal notification or on disposal.
    pub fn subscribe_exit(&self) -> mpsc::UnboundedReceiver<i32> {
        self.exit.subscribe()
    }

    /// Error notification: construction and runtime failures
    ///
    /// The stream ends after the terminal notification or on disposal.
    pub fn subscribe_error(&self) -> mpsc::UnboundedReceiver<ProcessFailure> {
        self.errors.subscribe()
    }

    /// Coalesced output chunks produced from now on
    ///
    /// The stream ends once the process terminated and all output was
    /// delivered, or on disposal.
    pub fn create_output_stream(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        self.buffer.subscribe()
    }

    /// Spawn the process through `launcher`
    ///
    /// Failures move the process to `Failed`, fire the error notification
    /// and are returned; they never panic.
    pub async fn start(self: &Arc<Self>, launcher: &dyn ProcessLauncher) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle();
            if self.is_disposed() {
                return Err(ProcessError::NotRunning);
            }
            if lifecycle.state != ProcessState::Starting || lifecycle.launching {
                return Err(ProcessError::AlreadyStarted);
            }
            lifecycle.launching = true;
        }

        let launched = match self.config.validate() {
            Ok(()) => launcher.launch(&self.config).await,
            Err(e) => Err(e),
        };

        let launched = match launched {
            Ok(launched) => launched,
            Err(e) => {
                self.lifecycle().launching = false;
                error!(
                    id = ?self.id(),
                    command = %self.config.command,
                    backend = launcher.name(),
                    error = %e,
                    "Failed to launch process"
                );
                self.fail(FailureKind::Construction, &e);
                self.release();
                return Err(e);
            }
        };

        // Checked under the same lock dispose() inspects, so a disposal
        // racing the launch either sees Running or is seen here.
        let accepted = {
            let mut lifecycle = self.lifecycle();
            lifecycle.launching = false;
            if self.is_disposed() {
                false
            } else {
                lifecycle.pid = launched.pid;
                lifecycle.state = ProcessState::Running;
                true
            }
        };

        if !accepted {
            debug!(id = ?self.id(), pid = ?launched.pid, "Disposed during launch, killing");
            let LaunchedProcess { mut control, .. } = launched;
            if let Err(e) = self.kill(control.as_mut()).await {
                warn!(id = ?self.id(), error = %e, "Process disposed during launch was not reaped");
            }
            self.fail(FailureKind::Construction, &ProcessError::NotRunning);
            drop(control);
            self.release();
            return Err(ProcessError::NotRunning);
        }

        self.attach(launched);
        Ok(())
    }

    fn attach(self: &Arc<Self>, launched: LaunchedProcess) {
        let LaunchedProcess {
            pid,
            output,
            input,
            control,
            terminal,
        } = launched;

        *lock(&self.input) = Some(input);
        *lock(&self.terminal) = terminal;

        debug!(id = ?self.id(), pid = ?pid, "Process running");

        let pump = tokio::spawn(Arc::clone(self).pump_output(output));
        tokio::spawn(Arc::clone(self).supervise(control, pump));
    }

    async fn pump_output(self: Arc<Self>, mut output: mpsc::Receiver<Vec<u8>>) {
        while let Some(chunk) = output.recv().await {
            self.buffer.push(&chunk);
        }
    }

    /// Wait for exit (or kill on disposal), drain output, then publish.
    async fn supervise(self: Arc<Self>, mut control: Box<dyn ProcessControl>, mut pump: JoinHandle<()>) {
        let outcome = tokio::select! {
            result = control.wait() => result,
            _ = self.cancel.cancelled() => self.kill(control.as_mut()).await,
        };

        if tokio::time::timeout(self.timeouts.output_drain, &mut pump)
            .await
            .is_err()
        {
            debug!(id = ?self.id(), "Output did not close after exit, abandoning reader");
            pump.abort();
        }

        // Every byte read before exit is emitted before the exit notification.
        self.buffer.idle().await;

        tokio::select! {
            _ = self.publication_open() => {}
            _ = self.cancel.cancelled() => {}
        }

        match outcome {
            Ok(code) => self.exited(code),
            Err(e) => {
                error!(id = ?self.id(), error = %e, "Process failed");
                self.fail(FailureKind::Runtime, &e);
            }
        }

        self.buffer.dispose();
        drop(control);
        self.release();
    }

    async fn kill(&self, control: &mut dyn ProcessControl) -> Result<i32> {
        debug!(id = ?self.id(), pid = ?self.pid(), "Killing disposed process");
        if let Err(e) = control.kill().await {
            warn!(id = ?self.id(), error = %e, "Failed to kill process");
        }

        match tokio::time::timeout(self.timeouts.kill, control.wait()).await {
            Ok(result) => result,
            Err(_) => Err(ProcessError::Timeout {
                millis: self.timeouts.kill.as_millis() as u64,
            }),
        }
    }

    fn exited(&self, code: i32) {
        if !self.transition(ProcessState::Exited { code }) {
            return;
        }
        info!(id = ?self.id(), code, "Process exited");
        self.run_terminal_hook();
        self.exit.emit(code);
        self.close_notifications();
    }

    fn fail(&self, kind: FailureKind, err: &ProcessError) {
        let failure = ProcessFailure::from_error(kind, err);
        if !self.transition(ProcessState::Failed {
            reason: failure.message.clone(),
        }) {
            return;
        }
        self.lifecycle().last_error = Some(failure.clone());
        self.run_terminal_hook();
        self.errors.emit(failure);
        self.close_notifications();
    }

    /// Move to a terminal state; false if one was already reached.
    fn transition(&self, next: ProcessState) -> bool {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state.is_terminal() {
            return false;
        }
        lifecycle.state = next;
        lifecycle.pid = None;
        true
    }

    fn close_notifications(&self) {
        self.exit.close();
        self.errors.close();
        lock(&self.input).take();
        lock(&self.terminal).take();
    }

    fn release(&self) {
        self.released.send_replace(true);
    }

    /// Wait for a terminal notification (or disposal) and return the state
    pub async fn terminated(&self) -> ProcessState {
        let mut exit = self.subscribe_exit();
        let mut errors = self.subscribe_error();

        let state = self.state();
        if state.is_terminal() {
            return state;
        }

        tokio::select! {
            _ = exit.recv() => {}
            _ = errors.recv() => {}
        }
        self.state()
    }

    async fn publication_open(&self) {
        let mut rx = self.publish.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Wait until the OS resource has been released
    ///
    /// Resolves once the process was reaped after exit, failure or kill. A
    /// process that never started is released on disposal.
    pub async fn released(&self) {
        let mut rx = self.released.subscribe();
        // The sender lives in `self`, so this only returns once released.
        let _ = rx.wait_for(|released| *released).await;
    }

    /// Send bytes to the process input
    pub async fn write(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        let tx = lock(&self.input).clone().ok_or(ProcessError::NotRunning)?;
        tx.send(data.into())
            .await
            .map_err(|_| ProcessError::Io("process input closed".to_string()))
    }

    /// Resize the terminal of a pty-backed process
    pub fn resize(&self, size: TerminalSize) -> Result<()> {
        let terminal = lock(&self.terminal).clone();
        match terminal {
            Some(terminal) => terminal.resize(size),
            None if self.state() == ProcessState::Running => Err(ProcessError::Unsupported(
                "resize requires a terminal-backed process".to_string(),
            )),
            None => Err(ProcessError::NotRunning),
        }
    }

    /// Release the process: kill it if still running, drop pending output and
    /// end every notification stream
    ///
    /// Idempotent and safe to race with natural exit.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(id = ?self.id(), state = ?self.state(), "Disposing process");

        self.run_terminal_hook();
        self.cancel.cancel();
        self.buffer.dispose();
        self.close_notifications();

        let idle = {
            let lifecycle = self.lifecycle();
            lifecycle.state == ProcessState::Starting && !lifecycle.launching
        };
        if idle {
            // Nothing was launched; a later start() refuses to run. An
            // in-flight launch releases once its process is reaped.
            self.release();
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        lock(&self.lifecycle)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
