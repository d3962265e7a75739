//! Bounded worker pool for asynchronous one-shot executions.
//!
//! Every submission gets its own task, but at most `max_workers` of them
//! run at once; the rest wait on a semaphore in submission order. Each
//! submission is tracked by an [`OperationHandle`] that can be waited on,
//! polled, or cancelled while still queued.
//!
//! # Example
//!
//! ```ignore
//! let pool = WorkerPool::new(4);
//! let handle = pool.submit("vm1", async { vm.execute("print(1)", None).await })?;
//!
//! match handle.wait(Some(Duration::from_secs(5))).await? {
//!     Some(outcome) => println!("{}", outcome.stdout),
//!     None => println!("still running"),
//! }
//! ```

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use luavm_process::ExecOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

// ============================================================================
// Operation identity and status
// ============================================================================

/// Unique identifier for a submitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a submitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Queued behind the worker bound.
    Pending,
    /// Holding a worker slot.
    Running,
    /// Finished with an outcome or a captured error.
    Done,
    /// Cancelled before it started, or aborted.
    Cancelled,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone)]
enum OperationState {
    Pending,
    Running,
    Done(std::result::Result<ExecOutcome, Arc<CoreError>>),
    Cancelled,
}

impl OperationState {
    fn status(&self) -> OperationStatus {
        match self {
            Self::Pending => OperationStatus::Pending,
            Self::Running => OperationStatus::Running,
            Self::Done(_) => OperationStatus::Done,
            Self::Cancelled => OperationStatus::Cancelled,
        }
    }

    fn is_finished(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Cancelled)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Pool counters for observability.
///
/// All counters are atomic and can be read without locking.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    /// Total operations submitted.
    submitted: AtomicU64,
    /// Operations waiting for a worker slot.
    queued: AtomicU64,
    /// Operations currently holding a worker slot.
    active: AtomicU64,
    /// Operations that ran to completion (successfully or not).
    completed: AtomicU64,
    /// Operations cancelled or aborted.
    cancelled: AtomicU64,
}

impl PoolStats {
    /// Get the number of submitted operations.
    fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Get the number of queued operations.
    fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Get the number of running operations.
    fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Get the number of completed operations.
    fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Get the number of cancelled operations.
    fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Point-in-time copy of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Worker bound.
    pub max_workers: usize,
    /// Total operations submitted.
    pub submitted: u64,
    /// Operations waiting for a worker slot.
    pub queued: u64,
    /// Operations currently running.
    pub active: u64,
    /// Operations that ran to completion.
    pub completed: u64,
    /// Operations cancelled or aborted.
    pub cancelled: u64,
}

// ============================================================================
// Operation handle
// ============================================================================

#[derive(Debug)]
struct Operation {
    id: OperationId,
    vm_id: String,
    submitted_at: DateTime<Utc>,
    state: watch::Sender<OperationState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Operation {
    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Handle to a submitted operation. Cheap to clone; all clones observe the
/// same state.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    inner: Arc<Operation>,
}

impl OperationHandle {
    /// Get the operation id.
    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    /// Get the VM the operation targets.
    pub fn vm_id(&self) -> &str {
        &self.inner.vm_id
    }

    /// When the operation was submitted.
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.inner.submitted_at
    }

    /// Current status.
    pub fn status(&self) -> OperationStatus {
        self.inner.state.borrow().status()
    }

    /// Whether the operation has finished or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.inner.state.borrow().is_finished()
    }

    /// Wait for the outcome.
    ///
    /// Returns `Ok(None)` if `timeout` elapses first; the operation keeps
    /// going and can be waited on again.
    ///
    /// # Errors
    ///
    /// `OperationFailed` wrapping the captured error if the execution
    /// failed, `OperationCancelled` if it was cancelled.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<Option<ExecOutcome>> {
        let mut rx = self.inner.state.subscribe();
        let finished = async move {
            match rx.wait_for(OperationState::is_finished).await {
                Ok(state) => (*state).clone(),
                Err(_) => OperationState::Cancelled,
            }
        };

        let state = match timeout {
            Some(limit) => match tokio::time::timeout(limit, finished).await {
                Ok(state) => state,
                Err(_) => return Ok(None),
            },
            None => finished.await,
        };

        match state {
            OperationState::Done(Ok(outcome)) => Ok(Some(outcome)),
            OperationState::Done(Err(source)) => Err(CoreError::OperationFailed {
                vm_id: self.inner.vm_id.clone(),
                source,
            }),
            OperationState::Cancelled => {
                Err(CoreError::OperationCancelled(self.inner.vm_id.clone()))
            }
            OperationState::Pending | OperationState::Running => Ok(None),
        }
    }

    /// Cancel the operation if it has not started.
    ///
    /// Returns `false` if it is already running or finished; running
    /// operations are not interrupted.
    pub fn cancel(&self) -> bool {
        let cancelled = self.inner.state.send_if_modified(|state| {
            if matches!(state, OperationState::Pending) {
                *state = OperationState::Cancelled;
                true
            } else {
                false
            }
        });
        if cancelled {
            if let Some(task) = self.inner.take_task() {
                task.abort();
            }
            tracing::debug!(vm_id = %self.inner.vm_id, operation_id = %self.inner.id, "Operation cancelled");
        }
        cancelled
    }

    /// Stop the operation whatever its state. Dropping a running
    /// execution kills its interpreter process.
    pub(crate) fn abort(&self) {
        let aborted = self.inner.state.send_if_modified(|state| {
            if state.is_finished() {
                false
            } else {
                *state = OperationState::Cancelled;
                true
            }
        });
        if let Some(task) = self.inner.take_task() {
            task.abort();
        }
        if aborted {
            tracing::debug!(vm_id = %self.inner.vm_id, operation_id = %self.inner.id, "Operation aborted");
        }
    }
}

/// Keeps counters and state consistent however the worker task ends,
/// including abort and panic.
struct TaskGuard {
    op: Arc<Operation>,
    stats: Arc<PoolStats>,
    started: bool,
}

impl TaskGuard {
    fn mark_started(&mut self) {
        self.stats.queued.fetch_sub(1, Ordering::Relaxed);
        self.stats.active.fetch_add(1, Ordering::Relaxed);
        self.started = true;
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.started {
            self.stats.active.fetch_sub(1, Ordering::Relaxed);
        } else {
            self.stats.queued.fetch_sub(1, Ordering::Relaxed);
        }

        self.op.state.send_if_modified(|state| {
            if state.is_finished() {
                false
            } else {
                *state = OperationState::Cancelled;
                true
            }
        });

        if matches!(*self.op.state.borrow(), OperationState::Cancelled) {
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.completed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Bounded pool of execution slots.
#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_workers: usize,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Create a pool running at most `max_workers` operations at once.
    pub fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            stats: Arc::new(PoolStats::default()),
        }
    }

    /// Copy the current counters.
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            max_workers: self.max_workers,
            submitted: self.stats.submitted(),
            queued: self.stats.queued(),
            active: self.stats.active(),
            completed: self.stats.completed(),
            cancelled: self.stats.cancelled(),
        }
    }

    /// Queue `work` for `vm_id` and return its handle immediately.
    ///
    /// # Errors
    ///
    /// `NoRuntime` when called outside a Tokio runtime.
    pub fn submit<F>(&self, vm_id: &str, work: F) -> Result<OperationHandle>
    where
        F: Future<Output = Result<ExecOutcome>> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| CoreError::NoRuntime)?;
        let (state, _) = watch::channel(OperationState::Pending);
        let op = Arc::new(Operation {
            id: OperationId::new(),
            vm_id: vm_id.to_string(),
            submitted_at: Utc::now(),
            state,
            task: Mutex::new(None),
        });

        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.stats.queued.fetch_add(1, Ordering::Relaxed);

        let mut guard = TaskGuard {
            op: Arc::clone(&op),
            stats: Arc::clone(&self.stats),
            started: false,
        };
        let permits = Arc::clone(&self.permits);

        let task = runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                // Pool closed while queued.
                return;
            };

            let op = Arc::clone(&guard.op);
            let started = op.state.send_if_modified(|state| {
                if matches!(state, OperationState::Pending) {
                    *state = OperationState::Running;
                    true
                } else {
                    false
                }
            });
            if !started {
                return;
            }
            guard.mark_started();

            tracing::debug!(vm_id = %op.vm_id, operation_id = %op.id, "Operation running");
            let result = work.await;
            if let Err(e) = &result {
                tracing::warn!(vm_id = %op.vm_id, operation_id = %op.id, error = %e, "Operation failed");
            }
            op.state.send_replace(OperationState::Done(result.map_err(Arc::new)));
        });

        *op.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        tracing::debug!(vm_id = %vm_id, operation_id = %op.id, "Operation submitted");

        Ok(OperationHandle { inner: op })
    }

    /// Stop accepting work; operations still queued end as cancelled.
    pub fn close(&self) {
        self.permits.close();
    }
}
