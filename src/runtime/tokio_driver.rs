//! Tokio adapters: an async tick loop and an execution hook that spawns a
//! [`WorkExecutor`] per admitted item.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::scheduler::LoopStep;
use crate::core::{
    AppResult, ExecutionHandle, ExecutionHook, ExecutionOutcome, Scheduler, SchedulerError,
    WorkExecutor, WorkItem,
};
use crate::util::serde::ResourceAllocation;

/// Drives [`Scheduler::tick`] from a tokio task instead of a dedicated thread.
pub struct TokioDriver {
    task: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl TokioDriver {
    /// Spawn the loop on the current runtime.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::AlreadyRunning` if a loop is already attached
    /// - `SchedulerError::Spawn` outside a tokio runtime
    pub fn spawn(scheduler: Arc<Scheduler>) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|e| SchedulerError::Spawn(e.to_string()))?;
        Self::spawn_on(scheduler, &runtime)
    }

    /// Spawn the loop on the given runtime.
    ///
    /// # Errors
    ///
    /// `SchedulerError::AlreadyRunning` if a loop is already attached.
    pub fn spawn_on(scheduler: Arc<Scheduler>, runtime: &Handle) -> Result<Self, SchedulerError> {
        if scheduler.loop_active.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyRunning);
        }
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        let task = runtime.spawn(async move {
            let mut wait = Duration::ZERO;
            loop {
                tokio::select! {
                    () = signal.notified() => break,
                    () = tokio::time::sleep(wait) => {}
                }
                match scheduler.guarded_tick() {
                    LoopStep::Continue(next) => wait = next,
                    LoopStep::Stop => break,
                }
            }
            scheduler.loop_active.store(false, Ordering::Release);
            debug!("tokio scheduler loop exiting");
        });
        info!("tokio scheduler loop started");
        Ok(Self { task, shutdown })
    }

    /// Whether the loop task has ended, by shutdown or escalation.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and wait for the in-flight tick.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "tokio scheduler loop ended abnormally");
        }
    }
}

/// [`ExecutionHook`] that runs each admitted item on a tokio runtime.
///
/// The executor's outcome is reported on the execution handle; a handle that
/// was preempted or cancelled meanwhile keeps its status.
pub struct TokioExecutionHook<E> {
    executor: E,
    runtime: Handle,
}

impl<E: WorkExecutor> TokioExecutionHook<E> {
    /// Spawn executions on `runtime`.
    pub const fn new(executor: E, runtime: Handle) -> Self {
        Self { executor, runtime }
    }

    /// Spawn executions on the current runtime.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Spawn` outside a tokio runtime.
    pub fn current(executor: E) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|e| SchedulerError::Spawn(e.to_string()))?;
        Ok(Self::new(executor, runtime))
    }
}

impl<E: WorkExecutor> ExecutionHook for TokioExecutionHook<E> {
    fn admit(
        &self,
        handle: &ExecutionHandle,
        item: &WorkItem,
        allocated: &ResourceAllocation,
    ) -> AppResult<()> {
        let executor = self.executor.clone();
        let handle = handle.clone();
        let item = item.clone();
        let allocated = *allocated;
        self.runtime.spawn(async move {
            let task_id = item.id.clone();
            let recorded = match executor.execute(item, allocated, handle.clone()).await {
                ExecutionOutcome::Completed => handle.complete(),
                ExecutionOutcome::Failed(reason) => handle.fail(reason),
            };
            if !recorded {
                debug!(task_id = %task_id, status = ?handle.status(), "execution outcome ignored");
            }
        });
        Ok(())
    }
}
