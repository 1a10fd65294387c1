//! Seams between the scheduler and whatever actually performs the work.

use async_trait::async_trait;

use crate::core::{AppResult, ExecutionHandle, WorkItem};
use crate::util::serde::ResourceAllocation;

/// Hook invoked once per admitted execution.
///
/// The scheduler treats `admit` as fire-and-forget: it must return quickly and
/// must eventually lead to [`ExecutionHandle::complete`] or
/// [`ExecutionHandle::fail`]. Returning an error marks the execution failed.
///
/// # Example
///
/// ```rust,ignore
/// struct ThreadHook;
///
/// impl ExecutionHook for ThreadHook {
///     fn admit(&self, handle: &ExecutionHandle, item: &WorkItem, _: &ResourceAllocation) -> AppResult<()> {
///         let handle = handle.clone();
///         let id = item.id.clone();
///         std::thread::spawn(move || {
///             transfer(&id);
///             handle.complete();
///         });
///         Ok(())
///     }
/// }
/// ```
pub trait ExecutionHook: Send + Sync {
    /// Start the work behind `handle`.
    ///
    /// # Errors
    ///
    /// Any error marks the execution failed; the completion sweep reclaims it.
    fn admit(
        &self,
        handle: &ExecutionHandle,
        item: &WorkItem,
        allocated: &ResourceAllocation,
    ) -> AppResult<()>;

    /// The scheduler preempted or cancelled the execution. Bookkeeping is
    /// already updated; stopping real work is up to the executor.
    fn revoke(&self, _handle: &ExecutionHandle) {}
}

/// Hook that starts nothing. Executions stay running until someone completes
/// their handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutionHook;

impl ExecutionHook for NoopExecutionHook {
    fn admit(
        &self,
        handle: &ExecutionHandle,
        _item: &WorkItem,
        _allocated: &ResourceAllocation,
    ) -> AppResult<()> {
        tracing::trace!(task_id = handle.task_id(), "noop execution hook");
        Ok(())
    }
}

/// Result of running a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The work finished.
    Completed,
    /// The work failed.
    Failed(String),
}

/// Async executor for work admitted by the scheduler.
///
/// Runtime adapters (see `runtime::tokio_driver`) wrap an implementation into an
/// [`ExecutionHook`] that spawns `execute` and reports the outcome on the handle.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone)]
/// struct TransferExecutor;
///
/// #[async_trait]
/// impl WorkExecutor for TransferExecutor {
///     async fn execute(&self, item: WorkItem, _allocated: ResourceAllocation, handle: ExecutionHandle) -> ExecutionOutcome {
///         match upload(&item.id, &handle).await {
///             Ok(()) => ExecutionOutcome::Completed,
///             Err(e) => ExecutionOutcome::Failed(e.to_string()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait WorkExecutor: Send + Sync + Clone + 'static {
    /// Perform the work. Long-running implementations should check
    /// [`ExecutionHandle::is_revoked`] and stop early.
    async fn execute(
        &self,
        item: WorkItem,
        allocated: ResourceAllocation,
        handle: ExecutionHandle,
    ) -> ExecutionOutcome;
}
