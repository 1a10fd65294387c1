//! Error types for scheduler operations.

use thiserror::Error;

use crate::util::serde::{Priority, TaskId};

/// Errors produced by scheduler components.
///
/// None of these propagate to callers of `add_task`; they are handled inside
/// the control loop and surface through the status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Admission denied: the tier's quota cannot absorb the request.
    #[error("resources exhausted for tier {tier}")]
    ResourceExhausted {
        /// Tier whose quota is exhausted.
        tier: Priority,
    },
    /// The task already holds an allocation.
    #[error("task {0} already holds an allocation")]
    AlreadyAllocated(TaskId),
    /// Preemption skipped because the rolling budget is spent.
    #[error("preemption rate limit reached ({limit} per minute)")]
    PreemptionRateLimited {
        /// Configured per-minute budget.
        limit: u32,
    },
    /// The id is neither queued nor running.
    #[error("unknown task: {0}")]
    UnknownReference(TaskId),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A single tick failed; the loop keeps going.
    #[error("tick fault: {0}")]
    TickFault(String),
    /// Scheduler bookkeeping no longer agrees with itself; the loop stops.
    #[error("scheduler state corrupted: {0}")]
    CorruptedState(String),
    /// `start` called while the loop is already running.
    #[error("scheduler loop already running")]
    AlreadyRunning,
    /// The loop thread could not be spawned.
    #[error("failed to spawn scheduler loop: {0}")]
    Spawn(String),
}

impl SchedulerError {
    /// Whether the fault means scheduler state can no longer be trusted.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::CorruptedState(_))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
