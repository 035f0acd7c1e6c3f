//! Scripted launcher for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::config::ProcessConfig;
use crate::error::{ProcessError, Result};
use crate::launcher::{LaunchedProcess, ProcessControl, ProcessLauncher};

/// Exit code reported after a fake process is killed
pub(crate) const KILLED_EXIT_CODE: i32 = 137;

/// Test-side ends of a fake process
pub(crate) struct FakeHandles {
    pub output: mpsc::Sender<Vec<u8>>,
    pub input: mpsc::Receiver<Vec<u8>>,
    pub exit: oneshot::Sender<Result<i32>>,
    killed: Arc<AtomicBool>,
}

impl FakeHandles {
    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct FakeControl {
    exit: oneshot::Receiver<Result<i32>>,
    killed: Arc<AtomicBool>,
}

#[async_trait]
impl ProcessControl for FakeControl {
    async fn wait(&mut self) -> Result<i32> {
        if self.killed.load(Ordering::SeqCst) {
            return Ok(KILLED_EXIT_CODE);
        }
        match (&mut self.exit).await {
            Ok(result) => result,
            Err(_) => Err(ProcessError::Crashed {
                reason: "exit sender dropped".to_string(),
            }),
        }
    }

    async fn kill(&mut self) -> Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Launcher whose processes are driven by the test
#[derive(Default)]
pub(crate) struct FakeLauncher {
    fail: bool,
    delay: Option<Duration>,
    launches: AtomicUsize,
    handles: Mutex<Vec<FakeHandles>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Launcher whose spawns take `delay` to complete
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Handles of the most recent launch
    pub fn take(&self) -> FakeHandles {
        self.handles
            .lock()
            .unwrap()
            .pop()
            .expect("no fake process was launched")
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self, config: &ProcessConfig) -> Result<LaunchedProcess> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(ProcessError::SpawnFailed(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: not found", config.command),
            )));
        }

        let (output_tx, output_rx) = mpsc::channel(16);
        let (input_tx, input_rx) = mpsc::channel(16);
        let (exit_tx, exit_rx) = oneshot::channel();
        let killed = Arc::new(AtomicBool::new(false));

        self.handles.lock().unwrap().push(FakeHandles {
            output: output_tx,
            input: input_rx,
            exit: exit_tx,
            killed: Arc::clone(&killed),
        });

        Ok(LaunchedProcess {
            pid: Some(4242),
            output: output_rx,
            input: input_tx,
            control: Box::new(FakeControl {
                exit: exit_rx,
                killed,
            }),
            terminal: None,
        })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
