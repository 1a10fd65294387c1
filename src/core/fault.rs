//! Structured reporting of control-loop faults.

use crate::core::SchedulerError;

/// Receives faults raised inside the control loop.
///
/// Tick-local faults are reported through [`on_tick_fault`](Self::on_tick_fault)
/// and the loop continues after a backoff. Fatal faults, or too many
/// consecutive ones, go to [`on_escalation`](Self::on_escalation) and the loop
/// stops.
pub trait FaultObserver: Send + Sync {
    /// A single tick failed.
    fn on_tick_fault(&self, fault: &SchedulerError, consecutive: u32);

    /// The loop is stopping because of `fault`.
    fn on_escalation(&self, fault: &SchedulerError);
}

/// Observer that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFaultObserver;

impl FaultObserver for TracingFaultObserver {
    fn on_tick_fault(&self, fault: &SchedulerError, consecutive: u32) {
        tracing::warn!(error = %fault, consecutive, "scheduler tick failed");
    }

    fn on_escalation(&self, fault: &SchedulerError) {
        tracing::error!(error = %fault, "scheduler loop stopped");
    }
}
