//! Core scheduling: work items, capacity accounting, executions and the scheduler.

pub mod audit;
pub mod error;
pub mod execution;
pub mod executor;
pub mod fault;
pub mod resource_manager;
pub mod scheduler;
#[cfg(not(target_arch = "wasm32"))]
pub mod scheduler_loop;
pub mod work_item;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use error::{AppResult, SchedulerError};
pub use execution::{ExecutionHandle, ExecutionStatus, WorkExecution};
pub use executor::{ExecutionHook, ExecutionOutcome, NoopExecutionHook, WorkExecutor};
pub use fault::{FaultObserver, TracingFaultObserver};
pub use resource_manager::{
    AllocationStrategy, ResourceManager, SystemResources, TierResourceStatus, TierShare,
    TotalUsage, Utilization,
};
pub use scheduler::{
    required_resources, Removal, Scheduler, SchedulerStats, SchedulerStatus, TickReport,
    BASE_REQUIREMENT, PREEMPTION_WINDOW_MS,
};
pub use work_item::WorkItem;
