//! Builders to construct a scheduler from configuration.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{SchedulerConfig, SchedulerSettings};
use crate::core::{
    AllocationStrategy, AuditSink, ExecutionHook, FaultObserver, ResourceManager, Scheduler,
    SchedulerError, SystemResources,
};
use crate::infra::queue::TieredQueue;
use crate::util::clock::Clock;

/// Build a scheduler with a fresh queue and resource manager from settings.
///
/// # Errors
///
/// `SchedulerError::InvalidConfig` if any section of `settings` is invalid.
pub fn build_scheduler(
    settings: &SchedulerSettings,
    hook: Arc<dyn ExecutionHook>,
) -> Result<Arc<Scheduler>, SchedulerError> {
    SchedulerBuilder::from_settings(settings.clone())
        .hook(hook)
        .build()
        .map(Arc::new)
}

/// Fluent construction of a [`Scheduler`] and its components.
#[derive(Default)]
pub struct SchedulerBuilder {
    settings: SchedulerSettings,
    queue: Option<Arc<TieredQueue>>,
    hook: Option<Arc<dyn ExecutionHook>>,
    observer: Option<Arc<dyn FaultObserver>>,
    clock: Option<Arc<dyn Clock>>,
    audit: Option<Arc<Mutex<dyn AuditSink>>>,
}

impl SchedulerBuilder {
    /// Start from default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a settings document.
    #[must_use]
    pub fn from_settings(settings: SchedulerSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Loop tunables.
    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.settings.scheduler = config;
        self
    }

    /// Global caps.
    #[must_use]
    pub const fn system_resources(mut self, system: SystemResources) -> Self {
        self.settings.system = system;
        self
    }

    /// Per-tier shares.
    #[must_use]
    pub fn strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.settings.strategy = strategy;
        self
    }

    /// Share an existing queue instead of creating one.
    #[must_use]
    pub fn queue(mut self, queue: Arc<TieredQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Hook that starts admitted work.
    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn ExecutionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Receiver of control-loop faults.
    #[must_use]
    pub fn fault_observer(mut self, observer: Arc<dyn FaultObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Time source; tests inject a `ManualClock`.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Audit trail of scheduling decisions.
    #[must_use]
    pub fn audit_sink(mut self, sink: Arc<Mutex<dyn AuditSink>>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Validate the settings and assemble the scheduler.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidConfig` if any section of the settings is invalid.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.settings
            .validate()
            .map_err(SchedulerError::InvalidConfig)?;

        let SchedulerSettings {
            scheduler,
            system,
            strategy,
        } = self.settings;
        let queue = self.queue.unwrap_or_else(|| Arc::new(TieredQueue::new()));
        let resources = Arc::new(ResourceManager::new(system, strategy)?);

        let mut built = Scheduler::new(queue, resources, scheduler)?;
        if let Some(hook) = self.hook {
            built = built.with_hook(hook);
        }
        if let Some(observer) = self.observer {
            built = built.with_fault_observer(observer);
        }
        if let Some(clock) = self.clock {
            built = built.with_clock(clock);
        }
        if let Some(sink) = self.audit {
            built = built.with_audit_sink(sink);
        }
        Ok(built)
    }
}
