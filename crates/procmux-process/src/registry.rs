//! Process registry - identifier assignment and lifetime tracking

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::process::{ManagedProcess, ProcessInfo};

/// External handle to a managed process
pub type ProcessId = i64;

/// Returned instead of an identifier when creation fails
pub const FAILED_PROCESS_ID: ProcessId = -1;

const FIRST_PROCESS_ID: ProcessId = 1;

/// Registry of live managed processes
///
/// Identifiers increase monotonically and are never reused while the
/// registry is alive. Registered processes are removed automatically once
/// they exit, fail or are disposed. Cloning shares the same registry.
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    processes: Mutex<HashMap<ProcessId, Arc<ManagedProcess>>>,
    next_id: AtomicI64,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                processes: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(FIRST_PROCESS_ID),
            }),
        }
    }

    /// Store a process under the next identifier
    ///
    /// The entry is removed when the process exits, fails or is disposed,
    /// before any exit or error subscriber is notified.
    pub fn register(&self, process: Arc<ManagedProcess>) -> ProcessId {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        if !process.assign_id(id) {
            warn!(id, previous = ?process.id(), "Process was already registered under another id");
        }

        let command = process.config().command.clone();
        self.inner.lock().insert(id, Arc::clone(&process));

        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        process.on_terminal(move || {
            if let Some(inner) = registry.upgrade() {
                debug!(id, "Process terminated, unregistering");
                inner.remove(id);
            }
        });

        info!(id, command = %command, "Registered process");
        id
    }

    /// Look up a process; misses are routine and return `None`
    pub fn get(&self, id: ProcessId) -> Option<Arc<ManagedProcess>> {
        self.inner.lock().get(&id).cloned()
    }

    /// Whether `id` is currently registered
    pub fn contains(&self, id: ProcessId) -> bool {
        self.inner.lock().contains_key(&id)
    }

    /// Remove a process; removing an absent id is a no-op
    ///
    /// Returns whether an entry was removed.
    pub fn unregister(&self, id: ProcessId) -> bool {
        self.inner.remove(id).is_some()
    }

    /// Unregister and dispose a process
    pub fn dispose(&self, id: ProcessId) -> bool {
        match self.inner.remove(id) {
            Some(process) => {
                process.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose every registered process and wait for their OS resources to
    /// be released, up to `timeout` per process
    pub async fn dispose_all(&self, timeout: Duration) {
        let processes: Vec<(ProcessId, Arc<ManagedProcess>)> =
            self.inner.lock().drain().collect();

        info!(count = processes.len(), "Disposing all processes");

        for (_, process) in &processes {
            process.dispose();
        }
        for (id, process) in processes {
            if tokio::time::timeout(timeout, process.released()).await.is_err() {
                warn!(id, "Process was not released in time");
            }
        }
    }

    /// Registered identifiers, ascending
    pub fn ids(&self) -> Vec<ProcessId> {
        let mut ids: Vec<ProcessId> = self.inner.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshots of every registered process, ordered by identifier
    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<ProcessInfo> = self.inner.lock().values().map(|p| p.info()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Number of registered processes
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<ProcessId, Arc<ManagedProcess>>> {
        self.processes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: ProcessId) -> Option<Arc<ManagedProcess>> {
        let removed = self.lock().remove(&id);
        match removed {
            Some(_) => info!(id, "Unregistered process"),
            None => debug!(id, "Process already unregistered"),
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProcessConfig, ServiceConfig};
    use crate::testing::FakeLauncher;

    fn process() -> Arc<ManagedProcess> {
        ManagedProcess::with_settings(ProcessConfig::new("fake"), &ServiceConfig::default())
    }

    #[tokio::test]
    async fn test_register_assigns_monotonic_ids() {
        let registry = ProcessRegistry::new();
        let first = process();

        let a = registry.register(Arc::clone(&first));
        let b = registry.register(process());

        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(first.id(), Some(a));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec![1, 2]);
        assert!(Arc::ptr_eq(&registry.get(a).unwrap(), &first));
    }

    #[tokio::test]
    async fn test_list_snapshots() {
        let registry = ProcessRegistry::new();
        registry.register(process());
        registry.register(process());

        let infos = registry.list();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].id, Some(1));
        assert_eq!(infos[1].id, Some(2));
        assert!(infos.iter().all(|info| info.command == "fake"));
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let registry = ProcessRegistry::new();
        assert!(registry.get(99).is_none());
        assert!(registry.get(FAILED_PROCESS_ID).is_none());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = ProcessRegistry::new();
        let id = registry.register(process());

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(!registry.unregister(12345));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let registry = ProcessRegistry::new();
        let id = registry.register(process());
        registry.unregister(id);

        let next = registry.register(process());
        assert!(next > id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_unregisters_automatically() {
        let registry = ProcessRegistry::new();
        let launcher = FakeLauncher::new();
        let process = process();

        let id = registry.register(Arc::clone(&process));
        let mut exit = process.subscribe_exit();
        process.start(&launcher).await.unwrap();

        let handles = launcher.take();
        drop(handles.output);
        handles.exit.send(Ok(0)).unwrap();

        assert_eq!(exit.recv().await, Some(0));
        assert!(registry.get(id).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unregistered_before_exit_is_observed() {
        let registry = ProcessRegistry::new();
        let launcher = FakeLauncher::new();

        for _ in 0..50 {
            let process = process();
            let id = registry.register(Arc::clone(&process));
            let mut exit = process.subscribe_exit();
            process.start(&launcher).await.unwrap();

            let handles = launcher.take();
            drop(handles.output);
            handles.exit.send(Ok(0)).unwrap();

            assert_eq!(exit.recv().await, Some(0));
            assert!(!registry.contains(id));
        }
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_unregisters_automatically() {
        let registry = ProcessRegistry::new();
        let process = process();

        let id = registry.register(Arc::clone(&process));
        assert!(process.start(&FakeLauncher::failing()).await.is_err());

        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn test_register_after_termination() {
        let registry = ProcessRegistry::new();
        let process = process();
        process.dispose();

        let id = registry.register(process);
        assert!(!registry.contains(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_dispose_still_unregisters() {
        let registry = ProcessRegistry::new();
        let launcher = FakeLauncher::new();
        let process = process();

        let id = registry.register(Arc::clone(&process));
        process.start(&launcher).await.unwrap();
        let handles = launcher.take();

        process.dispose();

        assert!(!registry.contains(id));
        process.released().await;
        assert!(handles.killed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_by_id() {
        let registry = ProcessRegistry::new();
        let launcher = FakeLauncher::new();
        let process = process();

        let id = registry.register(Arc::clone(&process));
        process.start(&launcher).await.unwrap();

        assert!(registry.dispose(id));
        assert!(!registry.dispose(id));
        assert!(process.is_disposed());
        assert!(!registry.contains(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_all() {
        let registry = ProcessRegistry::new();
        let launcher = FakeLauncher::new();

        let mut processes = Vec::new();
        for _ in 0..3 {
            let process = process();
            registry.register(Arc::clone(&process));
            process.start(&launcher).await.unwrap();
            processes.push(process);
        }

        registry.dispose_all(Duration::from_secs(10)).await;

        assert!(registry.is_empty());
        assert!(processes.iter().all(|p| p.is_disposed()));
    }
}
