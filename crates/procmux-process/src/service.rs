//! Process creation service
//!
//! Front door for callers across a control boundary: `create` never fails at
//! the API level. It returns a registered identifier, or
//! [`FAILED_PROCESS_ID`] after logging why construction failed.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{ProcessConfig, ServiceConfig};
use crate::error::Result;
use crate::launcher::ProcessLauncher;
use crate::process::{ManagedProcess, PublicationHold};
use crate::registry::{ProcessId, ProcessRegistry, FAILED_PROCESS_ID};

/// Creates managed processes and tracks them by identifier
pub struct ProcessService {
    launcher: Arc<dyn ProcessLauncher>,
    registry: ProcessRegistry,
    config: ServiceConfig,
}

impl std::fmt::Debug for ProcessService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessService")
            .field("launcher", &self.launcher.name())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl ProcessService {
    /// Create a service with its own registry
    pub fn new(launcher: Arc<dyn ProcessLauncher>, config: ServiceConfig) -> Self {
        Self::with_registry(launcher, config, ProcessRegistry::new())
    }

    /// Create a service sharing an existing registry
    pub fn with_registry(
        launcher: Arc<dyn ProcessLauncher>,
        config: ServiceConfig,
        registry: ProcessRegistry,
    ) -> Self {
        Self {
            launcher,
            registry,
            config,
        }
    }

    /// Spawn a process and return its identifier
    ///
    /// Returns [`FAILED_PROCESS_ID`] on any construction error; the error is
    /// logged, never propagated. On success the identifier is already
    /// registered when this returns.
    ///
    /// # Examples
    /// ```no_run
    /// use std::sync::Arc;
    /// use procmux_process::{NativeLauncher, ProcessConfig, ProcessService, ServiceConfig, FAILED_PROCESS_ID};
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let service = ProcessService::new(Arc::new(NativeLauncher::new()), ServiceConfig::default());
    /// let id = service.create(ProcessConfig::new("echo").args(["hello"])).await;
    /// assert_ne!(id, FAILED_PROCESS_ID);
    /// # }
    /// ```
    pub async fn create(&self, options: ProcessConfig) -> ProcessId {
        self.create_with(options, |_| {}).await
    }

    /// Like [`create`](Self::create), calling `attach` after registration
    /// and before launch
    ///
    /// Subscriptions made inside `attach` observe every chunk and
    /// notification, even for processes that exit immediately.
    pub async fn create_with<F>(&self, options: ProcessConfig, attach: F) -> ProcessId
    where
        F: FnOnce(&Arc<ManagedProcess>),
    {
        let command = options.command.clone();
        match self.try_create(options, attach).await {
            Ok((id, hold)) => {
                info!(id, command = %command, backend = self.launcher.name(), "Process created");
                // Terminal notifications (and unregistration) resume only
                // as the id is handed out.
                drop(hold);
                id
            }
            Err(e) => {
                error!(
                    command = %command,
                    backend = self.launcher.name(),
                    error = %e,
                    "Failed to create process"
                );
                FAILED_PROCESS_ID
            }
        }
    }

    async fn try_create<F>(
        &self,
        options: ProcessConfig,
        attach: F,
    ) -> Result<(ProcessId, PublicationHold)>
    where
        F: FnOnce(&Arc<ManagedProcess>),
    {
        let process = ManagedProcess::with_settings(options, &self.config);

        // Registered before launch so no notification can be missed.
        let id = self.registry.register(Arc::clone(&process));
        attach(&process);

        let hold = process.hold_publication();
        if let Err(e) = process.start(self.launcher.as_ref()).await {
            self.registry.unregister(id);
            return Err(e);
        }
        Ok((id, hold))
    }

    /// Look up a process by identifier
    pub fn get(&self, id: ProcessId) -> Option<Arc<ManagedProcess>> {
        self.registry.get(id)
    }

    /// Terminate and release a process by identifier
    ///
    /// Returns whether the identifier was registered.
    pub fn dispose(&self, id: ProcessId) -> bool {
        self.registry.dispose(id)
    }

    /// Dispose every process, waiting for each to be released
    pub async fn shutdown(&self) {
        self.registry.dispose_all(self.config.kill_timeout()).await;
    }

    /// Backing registry
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Service settings
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}
