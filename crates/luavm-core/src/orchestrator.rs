//! The orchestrator: VM registry, worker pool and interactive sessions
//! behind one thread-safe handle.

use crate::config::OrchestratorConfig;
use crate::error::{CoreError, Resource, Result};
use crate::pool::{OperationHandle, OperationStatus, PoolSnapshot, WorkerPool};
use crate::registry::SessionRegistry;
use crate::session::SessionInfo;
use crate::vm::{VmInfo, VmInstance};
use chrono::{DateTime, Utc};
use luavm_process::ExecOutcome;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug)]
struct TrackedVm {
    instance: Arc<VmInstance>,
    created_at: DateTime<Utc>,
}

/// Manages VMs, their asynchronous executions and interactive sessions.
///
/// All methods take `&self`; share it across tasks with `Arc`.
///
/// # Example
///
/// ```ignore
/// let orchestrator = Orchestrator::new(OrchestratorConfig::from_env())?;
///
/// orchestrator.create_vm("worker", false)?;
/// let outcome = orchestrator.execute_vm_sync("worker", "print(1 + 1)", None).await?;
/// assert_eq!(outcome.stdout.trim(), "2");
///
/// orchestrator.create_interactive_vm("repl", false, true)?;
/// orchestrator.send_input("repl", "x = 42\n")?;
/// orchestrator.detach_from_vm("repl")?;
/// orchestrator.attach_to_vm("repl")?;
/// orchestrator.send_input("repl", "print(x)\n")?;
/// ```
#[derive(Debug)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    vms: Mutex<HashMap<String, TrackedVm>>,
    operations: Mutex<HashMap<String, OperationHandle>>,
    pool: WorkerPool,
    sessions: SessionRegistry,
}

impl Orchestrator {
    /// Create an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            interpreter = %config.interpreter.program_name(),
            max_workers = config.max_workers,
            "Orchestrator created"
        );
        Ok(Self {
            pool: WorkerPool::new(config.max_workers),
            sessions: SessionRegistry::new(config.session.clone()),
            vms: Mutex::new(HashMap::new()),
            operations: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Get the session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Snapshot the worker pool counters.
    pub fn pool_snapshot(&self) -> PoolSnapshot {
        self.pool.snapshot()
    }

    fn vms(&self) -> MutexGuard<'_, HashMap<String, TrackedVm>> {
        self.vms.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn operations(&self) -> MutexGuard<'_, HashMap<String, OperationHandle>> {
        self.operations.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Untrack a VM together with its operation, aborting the operation.
    ///
    /// Both maps change under the `vms` lock, so a concurrent
    /// [`execute_vm_async`](Self::execute_vm_async) either sees the VM and
    /// has its operation removed here, or sees no VM at all.
    fn untrack(&self, id: &str) -> bool {
        let (removed, op) = {
            let mut vms = self.vms();
            let removed = vms.remove(id).is_some();
            (removed, self.operations().remove(id))
        };
        if let Some(op) = op {
            op.abort();
        }
        removed
    }

    fn instance(&self, id: &str) -> Result<Arc<VmInstance>> {
        self.vms()
            .get(id)
            .map(|vm| Arc::clone(&vm.instance))
            .ok_or_else(|| CoreError::not_found(Resource::Vm, id))
    }

    // ------------------------------------------------------------------
    // VM registry
    // ------------------------------------------------------------------

    /// Create and track a VM.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if `id` is already tracked.
    pub fn create_vm(&self, id: &str, networked: bool) -> Result<VmInfo> {
        let instance = VmInstance::new(
            id,
            networked,
            &self.config.interpreter,
            &self.config.network,
        );
        let kind = instance.kind();
        let tracked = TrackedVm {
            instance: Arc::new(instance),
            created_at: Utc::now(),
        };

        let created_at = tracked.created_at;
        {
            let mut vms = self.vms();
            if vms.contains_key(id) {
                return Err(CoreError::already_exists(Resource::Vm, id));
            }
            vms.insert(id.to_string(), tracked);
        }

        tracing::info!(vm_id = %id, kind = %kind, "VM created");
        Ok(VmInfo {
            id: id.to_string(),
            kind,
            interactive: false,
            created_at,
        })
    }

    /// Snapshot one VM.
    pub fn get_vm(&self, id: &str) -> Option<VmInfo> {
        let (kind, created_at) = {
            let vms = self.vms();
            let vm = vms.get(id)?;
            (vm.instance.kind(), vm.created_at)
        };
        Some(VmInfo {
            id: id.to_string(),
            kind,
            interactive: self.sessions.contains(id),
            created_at,
        })
    }

    /// Ids of every tracked VM, sorted.
    pub fn list_vms(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.vms().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot every tracked VM, ordered by id.
    pub fn vm_infos(&self) -> Vec<VmInfo> {
        let tracked: Vec<_> = self
            .vms()
            .iter()
            .map(|(id, vm)| (id.clone(), vm.instance.kind(), vm.created_at))
            .collect();
        let mut infos: Vec<VmInfo> = tracked
            .into_iter()
            .map(|(id, kind, created_at)| VmInfo {
                interactive: self.sessions.contains(&id),
                id,
                kind,
                created_at,
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Stop tracking a VM.
    ///
    /// Its tracked operation is aborted (killing a running interpreter)
    /// and any interactive session under the same id is terminated.
    ///
    /// # Errors
    ///
    /// `NotFound` if `id` is not tracked.
    pub async fn remove_vm(&self, id: &str) -> Result<()> {
        if !self.untrack(id) {
            return Err(CoreError::not_found(Resource::Vm, id));
        }
        if self.sessions.contains(id) {
            match self.sessions.terminate_session(id).await {
                Ok(()) | Err(CoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        tracing::info!(vm_id = %id, "VM removed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // One-shot execution
    // ------------------------------------------------------------------

    /// Run code on a VM and wait for the outcome.
    ///
    /// Runs directly on the caller's task, outside the worker bound.
    pub async fn execute_vm_sync(
        &self,
        id: &str,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutcome> {
        let vm = self.instance(id)?;
        tracing::debug!(vm_id = %id, "Executing synchronously");
        vm.execute(code, timeout).await
    }

    /// Queue code for a VM on the worker pool and return at once.
    ///
    /// The handle replaces any operation previously tracked for `id`; the
    /// older operation keeps running but can no longer be reached through
    /// [`wait_for_vm`](Self::wait_for_vm) or [`cancel_vm`](Self::cancel_vm).
    ///
    /// # Errors
    ///
    /// `NotFound` if `id` is not tracked, `NoRuntime` if called outside a
    /// Tokio runtime.
    pub fn execute_vm_async(
        &self,
        id: &str,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<OperationHandle> {
        // Lock order: vms, then operations. Holding vms until the handle is
        // tracked keeps a concurrent removal from leaving it behind.
        let vms = self.vms();
        let vm = vms
            .get(id)
            .map(|vm| Arc::clone(&vm.instance))
            .ok_or_else(|| CoreError::not_found(Resource::Vm, id))?;
        let code = code.to_string();
        let handle = self
            .pool
            .submit(id, async move { vm.execute(&code, timeout).await })?;
        let previous = self.operations().insert(id.to_string(), handle.clone());
        drop(vms);

        if let Some(previous) = previous {
            if !previous.is_finished() {
                tracing::debug!(vm_id = %id, operation_id = %previous.id(), "Replaced unfinished operation");
            }
        }
        tracing::debug!(vm_id = %id, operation_id = %handle.id(), "Execution queued");
        Ok(handle)
    }

    fn operation(&self, id: &str) -> Result<OperationHandle> {
        if let Some(op) = self.operations().get(id) {
            return Ok(op.clone());
        }
        if self.vms().contains_key(id) {
            Err(CoreError::not_found(Resource::Operation, id))
        } else {
            Err(CoreError::not_found(Resource::Vm, id))
        }
    }

    /// Wait for the operation tracked for a VM.
    ///
    /// Returns `Ok(None)` if `timeout` elapses first.
    ///
    /// # Errors
    ///
    /// `NotFound` if the VM is unknown or has no tracked operation; the
    /// captured execution error or `OperationCancelled` otherwise.
    pub async fn wait_for_vm(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<ExecOutcome>> {
        let op = self.operation(id)?;
        op.wait(timeout).await
    }

    /// Cancel the tracked operation for a VM if it has not started.
    ///
    /// Returns `false` if the VM has no operation or it is already running
    /// or finished.
    ///
    /// # Errors
    ///
    /// `NotFound` if the VM is unknown.
    pub fn cancel_vm(&self, id: &str) -> Result<bool> {
        match self.operation(id) {
            Ok(op) => Ok(op.cancel()),
            Err(CoreError::NotFound {
                resource: Resource::Operation,
                ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Status of the tracked operation for a VM, if any.
    ///
    /// # Errors
    ///
    /// `NotFound` if the VM is unknown.
    pub fn get_vm_status(&self, id: &str) -> Result<Option<OperationStatus>> {
        match self.operation(id) {
            Ok(op) => Ok(Some(op.status())),
            Err(CoreError::NotFound {
                resource: Resource::Operation,
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Interactive sessions
    // ------------------------------------------------------------------

    /// Create a VM together with a running interactive session.
    ///
    /// If the session cannot start, the VM is removed again.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if `id` is tracked; process or I/O errors if the
    /// interpreter cannot be started.
    pub fn create_interactive_vm(
        &self,
        id: &str,
        networked: bool,
        auto_attach: bool,
    ) -> Result<SessionInfo> {
        self.create_vm(id, networked)?;
        let instance = self.instance(id)?;

        let created = self.sessions.create_session(id, &instance).and_then(|info| {
            if auto_attach {
                self.sessions.attach(id)?;
                Ok(SessionInfo {
                    attached: true,
                    ..info
                })
            } else {
                Ok(info)
            }
        });

        if let Err(e) = &created {
            tracing::error!(vm_id = %id, error = %e, "Interactive VM creation failed, rolling back");
            self.vms().remove(id);
        }
        created
    }

    /// Forward text to a VM's session.
    pub fn send_input(&self, id: &str, text: &str) -> Result<()> {
        self.sessions.send_input(id, text)
    }

    /// Pop one output chunk from a VM's session.
    pub async fn read_output(&self, id: &str, timeout: Duration) -> Result<Option<String>> {
        self.sessions.read_output(id, timeout).await
    }

    /// Take all buffered output from a VM's session.
    pub async fn drain_output(&self, id: &str, timeout: Duration) -> Result<Option<String>> {
        self.sessions.drain_output(id, timeout).await
    }

    /// Attach to a VM's session. Attaching twice is allowed.
    pub fn attach_to_vm(&self, id: &str) -> Result<()> {
        self.sessions.attach(id)
    }

    /// Detach from a VM's session, leaving the interpreter running.
    ///
    /// # Errors
    ///
    /// `NotAttached` if nobody is attached.
    pub fn detach_from_vm(&self, id: &str) -> Result<()> {
        self.sessions.detach(id)
    }

    /// Stop a VM's session and stop tracking the VM.
    ///
    /// # Errors
    ///
    /// `NotFound` if no session exists for `id`.
    pub async fn terminate_vm_session(&self, id: &str) -> Result<()> {
        self.sessions.terminate_session(id).await?;
        self.untrack(id);
        tracing::info!(vm_id = %id, "Interactive VM terminated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Clusters and lifecycle
    // ------------------------------------------------------------------

    /// Create `count` VMs named `{base_id}_0` .. `{base_id}_{count-1}`.
    ///
    /// Stops at the first failure. VMs created before it stay tracked and
    /// are listed in the error.
    pub fn create_vm_cluster(
        &self,
        base_id: &str,
        count: usize,
        networked: bool,
    ) -> Result<Vec<String>> {
        let mut created = Vec::with_capacity(count);
        for n in 0..count {
            let id = format!("{base_id}_{n}");
            if let Err(e) = self.create_vm(&id, networked) {
                tracing::warn!(
                    base_id = %base_id,
                    failed_id = %id,
                    created = created.len(),
                    error = %e,
                    "Cluster creation stopped"
                );
                return Err(CoreError::ClusterIncomplete {
                    failed_id: id,
                    created,
                    source: Box::new(e),
                });
            }
            created.push(id);
        }
        tracing::info!(base_id = %base_id, count, "Cluster created");
        Ok(created)
    }

    /// Cancel queued work, abort running work and terminate every session.
    ///
    /// The orchestrator accepts no further asynchronous submissions
    /// afterwards; they end as cancelled.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down orchestrator");
        self.pool.close();

        let (vms, ops) = {
            let mut vms = self.vms();
            let count = vms.len();
            vms.clear();
            let ops: Vec<OperationHandle> =
                self.operations().drain().map(|(_, op)| op).collect();
            (count, ops)
        };
        for op in &ops {
            op.abort();
        }

        let sessions = self.sessions.terminate_all().await;

        tracing::info!(
            operations = ops.len(),
            sessions,
            vms,
            "Orchestrator shut down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(OrchestratorConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = OrchestratorConfig {
            max_workers: 0,
            ..OrchestratorConfig::default()
        };
        assert_eq!(Orchestrator::new(config).unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn test_create_vm_and_duplicate() {
        let orch = orchestrator();
        let info = orch.create_vm("a", true).unwrap();
        assert_eq!(info.id, "a");
        assert!(!info.interactive);

        let err = orch.create_vm("a", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(orch.get_vm("a").unwrap().kind, crate::VmKind::Networked);
        assert_eq!(orch.list_vms(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_unknown_vm_is_not_found() {
        let orch = orchestrator();
        assert!(orch.get_vm("ghost").is_none());
        assert!(orch
            .execute_vm_sync("ghost", "", None)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(orch.execute_vm_async("ghost", "", None).unwrap_err().is_not_found());
        assert!(orch.wait_for_vm("ghost", None).await.unwrap_err().is_not_found());
        assert!(orch.cancel_vm("ghost").unwrap_err().is_not_found());
        assert!(orch.get_vm_status("ghost").unwrap_err().is_not_found());
        assert!(orch.remove_vm("ghost").await.unwrap_err().is_not_found());
        assert!(orch.terminate_vm_session("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_vm_without_operation() {
        let orch = orchestrator();
        orch.create_vm("idle", false).unwrap();
        assert!(!orch.cancel_vm("idle").unwrap());
        assert_eq!(orch.get_vm_status("idle").unwrap(), None);
        let err = orch.wait_for_vm("idle", None).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::NotFound {
                resource: Resource::Operation,
                ..
            }
        ));
    }

    #[test]
    fn test_execute_async_without_runtime() {
        let orch = orchestrator();
        orch.create_vm("offline", false).unwrap();
        let err = orch.execute_vm_async("offline", "print(1)", None).unwrap_err();
        assert!(matches!(err, CoreError::NoRuntime));
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(orch.get_vm_status("offline").unwrap(), None);
    }

    #[tokio::test]
    async fn test_recreated_vm_starts_without_operation() {
        let orch = orchestrator();
        orch.create_vm("again", false).unwrap();
        let handle = orch.execute_vm_async("again", "print(1)", None).unwrap();
        assert!(orch.get_vm_status("again").unwrap().is_some());

        orch.remove_vm("again").await.unwrap();
        orch.create_vm("again", false).unwrap();
        assert_eq!(orch.get_vm_status("again").unwrap(), None);
        assert!(handle.is_finished());
    }

    #[test]
    fn test_cluster_ids_and_partial_failure() {
        let orch = orchestrator();
        let ids = orch.create_vm_cluster("node", 3, false).unwrap();
        assert_eq!(ids, vec!["node_0", "node_1", "node_2"]);

        orch.create_vm("grid_1", false).unwrap();
        let err = orch.create_vm_cluster("grid", 3, false).unwrap_err();
        match err {
            CoreError::ClusterIncomplete {
                failed_id, created, ..
            } => {
                assert_eq!(failed_id, "grid_1");
                assert_eq!(created, vec!["grid_0"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(orch.get_vm("grid_0").is_some());
    }

    #[test]
    fn test_empty_cluster() {
        let orch = orchestrator();
        assert!(orch.create_vm_cluster("none", 0, false).unwrap().is_empty());
        assert!(orch.list_vms().is_empty());
    }
}
