//! Running executions and the status cell shared with the external executor.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::WorkItem;
use crate::util::serde::{Priority, ResourceAllocation, TaskId};

/// Status of one execution attempt.
///
/// `Running` is the only non-terminal state. `Preempted` ends this execution
/// but the underlying item goes back to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ExecutionStatus {
    /// Admitted and holding resources.
    Running = 0,
    /// Finished successfully.
    Completed = 1,
    /// Finished with an error.
    Failed = 2,
    /// Evicted for a higher-priority item.
    Preempted = 3,
    /// Removed by a caller.
    Cancelled = 4,
}

impl ExecutionStatus {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Completed,
            2 => Self::Failed,
            3 => Self::Preempted,
            4 => Self::Cancelled,
            _ => Self::Running,
        }
    }

    /// Whether the execution can no longer change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

struct HandleInner {
    task_id: TaskId,
    priority: Priority,
    status: AtomicU8,
    progress: AtomicU8,
    error: Mutex<Option<String>>,
}

/// Status cell shared between the scheduler and the executor running the work.
///
/// The executor reports the outcome with [`complete`](Self::complete) or
/// [`fail`](Self::fail); the scheduler notices on its next completion sweep.
/// Preemption and cancellation flip the same cell, so an executor polling
/// [`is_revoked`](Self::is_revoked) learns it should abort.
#[derive(Clone)]
pub struct ExecutionHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("task_id", &self.inner.task_id)
            .field("priority", &self.inner.priority)
            .field("status", &self.status())
            .finish()
    }
}

impl ExecutionHandle {
    pub(crate) fn new(task_id: TaskId, priority: Priority) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                task_id,
                priority,
                status: AtomicU8::new(ExecutionStatus::Running as u8),
                progress: AtomicU8::new(0),
                error: Mutex::new(None),
            }),
        }
    }

    /// Id of the work being executed.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    /// Tier the work was admitted under.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        ExecutionStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    /// Move `Running -> to`. Returns `false` if the execution already ended.
    pub(crate) fn transition(&self, to: ExecutionStatus) -> bool {
        self.inner
            .status
            .compare_exchange(
                ExecutionStatus::Running as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Report success. Returns `false` if the execution already ended.
    pub fn complete(&self) -> bool {
        let done = self.transition(ExecutionStatus::Completed);
        if done {
            self.inner.progress.store(100, Ordering::Release);
        }
        done
    }

    /// Report failure. Returns `false` if the execution already ended.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        if self.transition(ExecutionStatus::Failed) {
            *self.inner.error.lock() = Some(reason);
            true
        } else {
            false
        }
    }

    /// Whether the scheduler took the slot away (preempted or cancelled).
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        matches!(
            self.status(),
            ExecutionStatus::Preempted | ExecutionStatus::Cancelled
        )
    }

    /// Record progress, clamped to 100.
    pub fn set_progress(&self, percent: u8) {
        self.inner.progress.store(percent.min(100), Ordering::Release);
    }

    /// Last reported progress percentage.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.inner.progress.load(Ordering::Acquire)
    }

    /// Failure reason, if any.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.inner.error.lock().clone()
    }
}

/// A work item admitted to run, with the resources granted to it.
#[derive(Debug, Clone)]
pub struct WorkExecution {
    /// The admitted item.
    pub item: WorkItem,
    /// Resources reserved for it.
    pub allocated: ResourceAllocation,
    /// Admission time.
    pub started_at_ms: u128,
    /// Time the scheduler observed a terminal status.
    pub completed_at_ms: Option<u128>,
    /// Time of preemption.
    pub preempted_at_ms: Option<u128>,
    /// Shared status cell.
    pub handle: ExecutionHandle,
}

impl WorkExecution {
    pub(crate) fn new(item: WorkItem, allocated: ResourceAllocation, started_at_ms: u128) -> Self {
        let handle = ExecutionHandle::new(item.id.clone(), item.priority);
        Self {
            item,
            allocated,
            started_at_ms,
            completed_at_ms: None,
            preempted_at_ms: None,
            handle,
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        self.handle.status()
    }
}
