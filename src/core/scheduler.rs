//! The scheduler: admission, preemption, starvation control and reconciliation.
//!
//! Each [`Scheduler::tick`] runs a fixed sequence:
//!
//! 1. promote items that starved past the threshold (once per item),
//! 2. dequeue one candidate and try to admit it according to the active policy,
//!    preempting one lower-tier execution when warranted,
//! 3. sweep executions whose handle reached a terminal status,
//! 4. prune the rolling preemption window.
//!
//! The queue and the resource manager each guard their own state; the
//! scheduler keeps cross-component invariants by performing their operations
//! in this fixed order, never holding two component locks at once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{OversizedPolicy, SchedulerConfig, SchedulingPolicy};
use crate::core::{
    build_audit_event, AuditAction, AuditSink, ExecutionHandle, ExecutionHook, ExecutionStatus,
    FaultObserver, NoopExecutionHook, ResourceManager, SchedulerError, SystemResources,
    TierResourceStatus, TierShare, TracingFaultObserver, WorkExecution, WorkItem,
};
use crate::infra::queue::{QueueStatus, TieredQueue};
use crate::util::clock::{Clock, SystemClock};
use crate::util::serde::{Priority, ResourceAllocation, TaskId};

/// Rolling window for the preemption rate limit.
pub const PREEMPTION_WINDOW_MS: u128 = 60_000;

/// Requirement of a NORMAL-tier item without overrides.
pub const BASE_REQUIREMENT: ResourceAllocation = ResourceAllocation {
    connections: 1,
    bandwidth_kbps: 1024,
    concurrency: 1,
    disk_io_mbps: 10,
    memory_mb: 64,
};

/// Resources an item needs in its current tier.
///
/// Starts from [`BASE_REQUIREMENT`], scales up for CRITICAL and down for
/// BACKGROUND, then applies the item's explicit overrides.
#[must_use]
pub fn required_resources(item: &WorkItem) -> ResourceAllocation {
    requirements_in_tier(item, item.priority)
}

fn requirements_in_tier(item: &WorkItem, tier: Priority) -> ResourceAllocation {
    let mut required = BASE_REQUIREMENT;
    match tier {
        Priority::Critical => {
            required.connections = 2;
            required.bandwidth_kbps = 2048;
            required.memory_mb = 128;
        }
        Priority::Background => {
            required.bandwidth_kbps = 256;
            required.memory_mb = 32;
        }
        Priority::High | Priority::Normal | Priority::Low => {}
    }
    for (&kind, &amount) in &item.resource_requirements {
        required.set(kind, amount);
    }
    required
}

/// Ids denied admission and when their wait started.
#[derive(Debug, Default)]
struct StarvationTracker {
    first_denied: HashMap<TaskId, u128>,
    /// Already promoted once; never tracked again.
    promoted: HashSet<TaskId>,
}

impl StarvationTracker {
    /// Returns `true` when tracking starts with this denial.
    fn note_denied(&mut self, id: &str, now_ms: u128) -> bool {
        if self.promoted.contains(id) || self.first_denied.contains_key(id) {
            return false;
        }
        self.first_denied.insert(id.to_string(), now_ms);
        true
    }

    fn take_starved(&mut self, now_ms: u128, threshold_ms: u128) -> Vec<TaskId> {
        let starved: Vec<TaskId> = self
            .first_denied
            .iter()
            .filter(|(_, &since)| now_ms.saturating_sub(since) > threshold_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &starved {
            self.first_denied.remove(id);
            self.promoted.insert(id.clone());
        }
        starved
    }

    fn is_promoted(&self, id: &str) -> bool {
        self.promoted.contains(id)
    }

    fn forget(&mut self, id: &str) {
        self.first_denied.remove(id);
        self.promoted.remove(id);
    }

    fn len(&self) -> usize {
        self.first_denied.len()
    }
}

#[derive(Debug, Default)]
struct PreemptionHistory {
    events: VecDeque<u128>,
}

impl PreemptionHistory {
    fn prune(&mut self, now_ms: u128) {
        while self
            .events
            .front()
            .is_some_and(|&t| now_ms.saturating_sub(t) >= PREEMPTION_WINDOW_MS)
        {
            self.events.pop_front();
        }
    }

    fn record(&mut self, now_ms: u128) {
        self.events.push_back(now_ms);
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}

/// Lock-free counters behind [`SchedulerStats`].
#[derive(Debug, Default)]
pub(crate) struct SchedulerCounters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    preempted: AtomicU64,
    rejected: AtomicU64,
    promoted: AtomicU64,
    retried: AtomicU64,
    faults: AtomicU64,
    consecutive_faults: AtomicU32,
    wait_ms_total: AtomicU64,
    wait_samples: AtomicU64,
    exec_ms_total: AtomicU64,
    exec_samples: AtomicU64,
    last_tick_ms: AtomicU64,
}

impl SchedulerCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn sample(total: &AtomicU64, samples: &AtomicU64, ms: u128) {
        total.fetch_add(u64::try_from(ms).unwrap_or(u64::MAX), Ordering::Relaxed);
        samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed tick; returns the consecutive-failure count.
    pub(crate) fn record_fault(&self) -> u32 {
        self.faults.fetch_add(1, Ordering::Relaxed);
        self.consecutive_faults.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn reset_consecutive_faults(&self) {
        self.consecutive_faults.store(0, Ordering::Release);
    }

    #[allow(clippy::cast_precision_loss)]
    fn snapshot(&self) -> SchedulerStats {
        let avg = |total: &AtomicU64, samples: &AtomicU64| {
            let n = samples.load(Ordering::Relaxed);
            if n == 0 {
                0.0
            } else {
                total.load(Ordering::Relaxed) as f64 / n as f64
            }
        };
        let last_tick = self.last_tick_ms.load(Ordering::Relaxed);
        SchedulerStats {
            total_scheduled: self.scheduled.load(Ordering::Relaxed),
            total_completed: self.completed.load(Ordering::Relaxed),
            total_failed: self.failed.load(Ordering::Relaxed),
            total_cancelled: self.cancelled.load(Ordering::Relaxed),
            total_preempted: self.preempted.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
            total_promoted: self.promoted.load(Ordering::Relaxed),
            total_retried: self.retried.load(Ordering::Relaxed),
            total_faults: self.faults.load(Ordering::Relaxed),
            consecutive_faults: self.consecutive_faults.load(Ordering::Relaxed),
            average_wait_ms: avg(&self.wait_ms_total, &self.wait_samples),
            average_execution_ms: avg(&self.exec_ms_total, &self.exec_samples),
            last_tick_ms: (last_tick != 0).then_some(last_tick),
        }
    }
}

/// Aggregate scheduler statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Items admitted.
    pub total_scheduled: u64,
    /// Executions that completed.
    pub total_completed: u64,
    /// Executions that failed.
    pub total_failed: u64,
    /// Executions cancelled by callers.
    pub total_cancelled: u64,
    /// Preemption events.
    pub total_preempted: u64,
    /// Items dropped as never admittable.
    pub total_rejected: u64,
    /// Starvation promotions.
    pub total_promoted: u64,
    /// Failed items requeued for another attempt.
    pub total_retried: u64,
    /// Failed ticks.
    pub total_faults: u64,
    /// Failed ticks since the last successful one.
    pub consecutive_faults: u32,
    /// Mean time from submission to admission.
    pub average_wait_ms: f64,
    /// Mean time from admission to observed completion.
    pub average_execution_ms: f64,
    /// Time of the last completed tick.
    pub last_tick_ms: Option<u64>,
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Policy actually applied this tick.
    pub policy: SchedulingPolicy,
    /// Items promoted for starving.
    pub promoted: usize,
    /// Item admitted this tick.
    pub admitted: Option<TaskId>,
    /// Item denied and requeued this tick.
    pub denied: Option<TaskId>,
    /// Item dropped as never admittable.
    pub rejected: Option<TaskId>,
    /// Execution evicted this tick.
    pub preempted: Option<TaskId>,
    /// Executions reclaimed by the completion sweep.
    pub finished: usize,
}

/// Result of a successful removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The item was still queued and has been tombstoned.
    Dequeued,
    /// The item was running; its execution was cancelled and resources freed.
    Cancelled,
}

/// Read snapshot for observability layers. Best effort, not linearizable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether a control loop is attached and running.
    pub is_running: bool,
    /// Configured policy.
    pub policy: SchedulingPolicy,
    /// Policy the next tick would apply (differs from `policy` under `Adaptive`).
    pub effective_policy: SchedulingPolicy,
    /// Current configuration.
    pub config: SchedulerConfig,
    /// Counters.
    pub stats: SchedulerStats,
    /// Queue lengths and distribution.
    pub queue: QueueStatus,
    /// Executions holding resources.
    pub running_count: usize,
    /// Items currently tracked for starvation.
    pub starvation_count: usize,
    /// Preemptions inside the rolling window.
    pub recent_preemptions: usize,
    /// Per-tier resource status.
    pub resources: std::collections::BTreeMap<Priority, TierResourceStatus>,
}

/// Loop decision after one guarded tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopStep {
    /// Wait this long, then tick again.
    Continue(Duration),
    /// Stop the loop.
    Stop,
}

/// Priority-tiered, resource-bounded scheduler.
///
/// Producers call [`add_task`](Self::add_task) and [`remove_task`](Self::remove_task)
/// from any thread. A single driver calls [`tick`](Self::tick): either the
/// dedicated thread started by `start`, the tokio driver, or the embedding
/// application itself.
pub struct Scheduler {
    queue: Arc<TieredQueue>,
    resources: Arc<ResourceManager>,
    config: RwLock<SchedulerConfig>,
    running: Mutex<HashMap<TaskId, WorkExecution>>,
    starvation: Mutex<StarvationTracker>,
    preemptions: Mutex<PreemptionHistory>,
    pub(crate) counters: SchedulerCounters,
    hook: Arc<dyn ExecutionHook>,
    observer: Arc<dyn FaultObserver>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<Mutex<dyn AuditSink>>>,
    pub(crate) loop_active: AtomicBool,
    #[cfg(not(target_arch = "wasm32"))]
    pub(crate) worker: Mutex<Option<crate::core::scheduler_loop::LoopWorker>>,
}

impl Scheduler {
    /// Create a scheduler over the given queue and resource manager.
    ///
    /// Uses a no-op execution hook, the tracing fault observer and the system
    /// clock until replaced with the `with_*` methods.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidConfig` if `config` fails validation.
    pub fn new(
        queue: Arc<TieredQueue>,
        resources: Arc<ResourceManager>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        Ok(Self {
            queue,
            resources,
            config: RwLock::new(config),
            running: Mutex::new(HashMap::new()),
            starvation: Mutex::new(StarvationTracker::default()),
            preemptions: Mutex::new(PreemptionHistory::default()),
            counters: SchedulerCounters::default(),
            hook: Arc::new(NoopExecutionHook),
            observer: Arc::new(TracingFaultObserver),
            clock: Arc::new(SystemClock),
            audit: None,
            loop_active: AtomicBool::new(false),
            #[cfg(not(target_arch = "wasm32"))]
            worker: Mutex::new(None),
        })
    }

    /// Replace the execution hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn ExecutionHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Replace the fault observer.
    #[must_use]
    pub fn with_fault_observer(mut self, observer: Arc<dyn FaultObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<Mutex<dyn AuditSink>>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// The pending-work queue.
    #[must_use]
    pub const fn queue(&self) -> &Arc<TieredQueue> {
        &self.queue
    }

    /// The resource manager.
    #[must_use]
    pub const fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// Submit work. Never fails; feedback arrives through [`status`](Self::status).
    pub fn add_task(&self, item: WorkItem) {
        debug!(task_id = %item.id, tier = %item.priority, "task submitted");
        self.audit(&item.id, item.priority, AuditAction::Submit, None);
        self.queue.put(item);
    }

    /// Remove queued work or cancel running work.
    ///
    /// Returns `false` only when the id is neither queued nor running. An item
    /// the current tick has already dequeued but not yet admitted or requeued
    /// is in neither place, so removing it in that window returns `false` and
    /// the tick goes on to admit it.
    pub fn remove_task(&self, id: &str) -> bool {
        self.try_remove_task(id).is_ok()
    }

    /// Like [`remove_task`](Self::remove_task) but says what happened.
    ///
    /// # Errors
    ///
    /// `SchedulerError::UnknownReference` if the id is neither queued nor running.
    pub fn try_remove_task(&self, id: &str) -> Result<Removal, SchedulerError> {
        let queued_tier = self.queue.tier_of(id);
        if self.queue.remove(id) {
            self.starvation.lock().forget(id);
            if let Some(tier) = queued_tier {
                self.audit(id, tier, AuditAction::Cancel, Some("dequeued".into()));
            }
            debug!(task_id = id, "queued task removed");
            return Ok(Removal::Dequeued);
        }

        let execution = self.running.lock().remove(id);
        let Some(execution) = execution else {
            return Err(SchedulerError::UnknownReference(id.to_string()));
        };
        let now = self.clock.now_ms();
        if execution.handle.transition(ExecutionStatus::Cancelled) {
            self.resources
                .release(id, execution.item.priority, Some(&execution.allocated));
            SchedulerCounters::bump(&self.counters.cancelled);
            self.audit(id, execution.item.priority, AuditAction::Cancel, None);
            info!(task_id = id, tier = %execution.item.priority, "running task cancelled");
            self.hook.revoke(&execution.handle);
        } else {
            // Finished before we got to it: settle it the way the sweep would.
            let cfg = self.config.read().clone();
            self.settle(execution, now, &cfg, false);
        }
        Ok(Removal::Cancelled)
    }

    /// Run one scheduling round.
    ///
    /// # Errors
    ///
    /// `SchedulerError::CorruptedState` when a finished execution has no
    /// recorded allocation; the round's other work is still applied.
    pub fn tick(&self) -> Result<TickReport, SchedulerError> {
        let now = self.clock.now_ms();
        let cfg = self.config.read().clone();
        let mut report = TickReport {
            promoted: self.handle_starvation(now, &cfg),
            ..TickReport::default()
        };

        report.policy = self.effective_policy(&cfg);
        match report.policy {
            SchedulingPolicy::PriorityPreemptive => {
                let candidate = self
                    .queue
                    .pop_from(&[Priority::Critical, Priority::High])
                    .or_else(|| self.queue.pop_from(&[Priority::Normal]))
                    .or_else(|| self.queue.pop_from(&[Priority::Low, Priority::Background]));
                if let Some(item) = candidate {
                    self.admit(item, now, &cfg, true, &mut report);
                }
            }
            SchedulingPolicy::RoundRobin
            | SchedulingPolicy::FairShare
            | SchedulingPolicy::Adaptive => {
                if let Some(item) = self.queue.pop() {
                    self.admit(item, now, &cfg, false, &mut report);
                }
            }
        }

        let swept = self.sweep_finished(now, &cfg);
        self.preemptions.lock().prune(now);
        let stamp = u64::try_from(now).unwrap_or(u64::MAX);
        self.counters.last_tick_ms.store(stamp, Ordering::Relaxed);
        report.finished = swept?;
        Ok(report)
    }

    /// Tick with panics converted to faults, and decide what the loop does next.
    pub(crate) fn guarded_tick(&self) -> LoopStep {
        let cfg = self.config.read().clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.tick()))
            .unwrap_or_else(|payload| Err(SchedulerError::TickFault(panic_message(&*payload))));

        match outcome {
            Ok(_) => {
                self.counters.reset_consecutive_faults();
                LoopStep::Continue(cfg.tick_interval())
            }
            Err(fault) => {
                let consecutive = self.counters.record_fault();
                if fault.is_fatal() || consecutive >= cfg.max_consecutive_faults {
                    self.observer.on_escalation(&fault);
                    LoopStep::Stop
                } else {
                    self.observer.on_tick_fault(&fault, consecutive);
                    LoopStep::Continue(cfg.fault_backoff())
                }
            }
        }
    }

    fn effective_policy(&self, cfg: &SchedulerConfig) -> SchedulingPolicy {
        match cfg.policy {
            SchedulingPolicy::Adaptive => {
                let load = self.resources.total_usage().utilization.concurrency;
                if load > cfg.adaptive_load_threshold_pct {
                    SchedulingPolicy::PriorityPreemptive
                } else {
                    SchedulingPolicy::FairShare
                }
            }
            other => other,
        }
    }

    fn handle_starvation(&self, now: u128, cfg: &SchedulerConfig) -> usize {
        let starved = self
            .starvation
            .lock()
            .take_starved(now, cfg.starvation_threshold_ms());
        let mut promoted = 0;
        for id in starved {
            if self.queue.update_priority(&id, Priority::High) {
                promoted += 1;
                SchedulerCounters::bump(&self.counters.promoted);
                info!(task_id = %id, "starving task promoted to high");
                self.audit(&id, Priority::High, AuditAction::Promote, None);
            }
        }
        promoted
    }

    fn admit(
        &self,
        item: WorkItem,
        now: u128,
        cfg: &SchedulerConfig,
        allow_preemption: bool,
        report: &mut TickReport,
    ) {
        let required = required_resources(&item);

        if cfg.oversized_policy == OversizedPolicy::Reject && self.is_unadmittable(&item, &required)
        {
            report.rejected = Some(self.reject(item, &required));
            return;
        }

        if allow_preemption
            && item.priority.is_preemptive()
            && cfg.preemption_enabled
            && !self.resources.can_allocate(item.priority, &required)
        {
            match self.check_preemption_budget(now, cfg) {
                Ok(()) => report.preempted = self.preempt_for(&item, now),
                Err(e) => debug!(task_id = %item.id, error = %e, "preemption skipped"),
            }
        }

        match self.resources.allocate(&item.id, item.priority, required) {
            Ok(()) => report.admitted = Some(self.start_execution(item, required, now)),
            Err(e) => {
                debug!(task_id = %item.id, tier = %item.priority, error = %e, "admission denied");
                report.denied = Some(item.id.clone());
                if self.starvation.lock().note_denied(&item.id, now) {
                    self.audit(&item.id, item.priority, AuditAction::Deny, Some(e.to_string()));
                }
                self.queue.requeue(item);
            }
        }
    }

    /// An item that can never fit a quota it can reach. Promotion to HIGH is the
    /// only tier change an item can still get, and only once.
    fn is_unadmittable(&self, item: &WorkItem, required: &ResourceAllocation) -> bool {
        if required.fits_within(&self.resources.max_allocation(item.priority)) {
            return false;
        }
        if item.priority == Priority::High || self.starvation.lock().is_promoted(&item.id) {
            return true;
        }
        !requirements_in_tier(item, Priority::High)
            .fits_within(&self.resources.max_allocation(Priority::High))
    }

    fn reject(&self, item: WorkItem, required: &ResourceAllocation) -> TaskId {
        self.starvation.lock().forget(&item.id);
        SchedulerCounters::bump(&self.counters.rejected);
        warn!(
            task_id = %item.id,
            tier = %item.priority,
            ?required,
            "task can never fit its tier quota; rejected"
        );
        self.audit(
            &item.id,
            item.priority,
            AuditAction::Reject,
            Some(format!("{required:?}")),
        );
        item.id
    }

    fn check_preemption_budget(
        &self,
        now: u128,
        cfg: &SchedulerConfig,
    ) -> Result<(), SchedulerError> {
        let mut history = self.preemptions.lock();
        history.prune(now);
        let budget = usize::try_from(cfg.max_preemptions_per_minute).unwrap_or(usize::MAX);
        if history.len() < budget {
            Ok(())
        } else {
            Err(SchedulerError::PreemptionRateLimited {
                limit: cfg.max_preemptions_per_minute,
            })
        }
    }

    /// Evict the lowest-priority running execution ranked strictly below
    /// `incoming`. Ties go to the most recently started one.
    fn preempt_for(&self, incoming: &WorkItem, now: u128) -> Option<TaskId> {
        let mut victim = {
            let mut running = self.running.lock();
            let victim_id = running
                .values()
                .filter(|e| e.item.priority > incoming.priority)
                .filter(|e| e.status() == ExecutionStatus::Running)
                .max_by(|a, b| {
                    a.item
                        .priority
                        .cmp(&b.item.priority)
                        .then(a.started_at_ms.cmp(&b.started_at_ms))
                        .then_with(|| b.item.id.cmp(&a.item.id))
                })
                .map(|e| e.item.id.clone())?;
            let execution = running.remove(&victim_id)?;
            if !execution.handle.transition(ExecutionStatus::Preempted) {
                // Finished concurrently; leave it for the sweep.
                running.insert(victim_id, execution);
                return None;
            }
            execution
        };

        victim.preempted_at_ms = Some(now);
        let id = victim.item.id.clone();
        let tier = victim.item.priority;
        self.resources.release(&id, tier, Some(&victim.allocated));
        self.queue.requeue(victim.item.clone());
        self.preemptions.lock().record(now);
        SchedulerCounters::bump(&self.counters.preempted);
        info!(
            task_id = %id,
            %tier,
            for_task = %incoming.id,
            "running task preempted"
        );
        self.audit(
            &id,
            tier,
            AuditAction::Preempt,
            Some(format!("for {}", incoming.id)),
        );
        self.hook.revoke(&victim.handle);
        Some(id)
    }

    fn start_execution(&self, item: WorkItem, required: ResourceAllocation, now: u128) -> TaskId {
        self.starvation.lock().forget(&item.id);
        SchedulerCounters::bump(&self.counters.scheduled);
        SchedulerCounters::sample(
            &self.counters.wait_ms_total,
            &self.counters.wait_samples,
            now.saturating_sub(item.created_at_ms),
        );

        let id = item.id.clone();
        let tier = item.priority;
        let execution = WorkExecution::new(item, required, now);
        let handle = execution.handle.clone();
        let admitted_item = execution.item.clone();
        self.running.lock().insert(id.clone(), execution);

        debug!(task_id = %id, %tier, "task admitted");
        self.audit(&id, tier, AuditAction::Admit, None);

        if let Err(e) = self.hook.admit(&handle, &admitted_item, &required) {
            warn!(task_id = %id, error = %e, "execution hook failed; marking execution failed");
            handle.fail(format!("{e:#}"));
        }
        id
    }

    fn sweep_finished(&self, now: u128, cfg: &SchedulerConfig) -> Result<usize, SchedulerError> {
        let finished: Vec<WorkExecution> = {
            let mut running = self.running.lock();
            let ids: Vec<TaskId> = running
                .iter()
                .filter(|(_, e)| e.status().is_terminal())
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| running.remove(id)).collect()
        };

        let count = finished.len();
        let mut orphaned = Vec::new();
        for execution in finished {
            let id = execution.item.id.clone();
            if !self.settle(execution, now, cfg, true) {
                orphaned.push(id);
            }
        }

        if orphaned.is_empty() {
            Ok(count)
        } else {
            Err(SchedulerError::CorruptedState(format!(
                "finished executions without an allocation: {}",
                orphaned.join(", ")
            )))
        }
    }

    /// Release a finished execution and account for it. Returns `false` when
    /// the resource manager had no allocation on record.
    fn settle(
        &self,
        mut execution: WorkExecution,
        now: u128,
        cfg: &SchedulerConfig,
        allow_retry: bool,
    ) -> bool {
        execution.completed_at_ms = Some(now);
        let id = execution.item.id.clone();
        let tier = execution.item.priority;
        let released = self
            .resources
            .release(&id, tier, Some(&execution.allocated))
            .is_some();

        let status = execution.status();
        match status {
            ExecutionStatus::Completed | ExecutionStatus::Failed => {
                SchedulerCounters::sample(
                    &self.counters.exec_ms_total,
                    &self.counters.exec_samples,
                    now.saturating_sub(execution.started_at_ms),
                );
            }
            ExecutionStatus::Cancelled | ExecutionStatus::Preempted | ExecutionStatus::Running => {}
        }

        match status {
            ExecutionStatus::Completed => {
                SchedulerCounters::bump(&self.counters.completed);
                debug!(task_id = %id, %tier, "task completed");
                self.audit(&id, tier, AuditAction::Complete, None);
            }
            ExecutionStatus::Failed => {
                SchedulerCounters::bump(&self.counters.failed);
                let reason = execution.handle.error();
                debug!(task_id = %id, %tier, reason = ?reason, "task failed");
                self.audit(&id, tier, AuditAction::Fail, reason);
                if allow_retry && cfg.retry_failed && execution.item.can_retry() {
                    let mut item = execution.item;
                    item.retry_count += 1;
                    SchedulerCounters::bump(&self.counters.retried);
                    info!(task_id = %id, attempt = item.retry_count, "requeueing failed task");
                    self.audit(&id, tier, AuditAction::Retry, None);
                    self.queue.requeue(item);
                }
            }
            ExecutionStatus::Cancelled => {
                SchedulerCounters::bump(&self.counters.cancelled);
                self.audit(&id, tier, AuditAction::Cancel, None);
            }
            ExecutionStatus::Preempted | ExecutionStatus::Running => {}
        }
        released
    }

    fn audit(&self, task_id: &str, tier: Priority, action: AuditAction, detail: Option<String>) {
        if let Some(sink) = &self.audit {
            let event = build_audit_event(task_id, tier, action, detail).at(self.clock.now_ms());
            sink.lock().record(event);
        }
    }

    /// Whether a control loop is attached and running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.loop_active.load(Ordering::Acquire)
    }

    /// Snapshot of policy, configuration, counters, queue and resources.
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let config = self.config.read().clone();
        let now = self.clock.now_ms();
        let recent_preemptions = {
            let mut history = self.preemptions.lock();
            history.prune(now);
            history.len()
        };
        SchedulerStatus {
            is_running: self.is_running(),
            policy: config.policy,
            effective_policy: self.effective_policy(&config),
            stats: self.counters.snapshot(),
            queue: self.queue.status(),
            running_count: self.running.lock().len(),
            starvation_count: self.starvation.lock().len(),
            recent_preemptions,
            resources: self.resources.status(),
            config,
        }
    }

    /// Counters only.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }

    /// Handles of every running execution.
    #[must_use]
    pub fn running_handles(&self) -> Vec<ExecutionHandle> {
        self.running
            .lock()
            .values()
            .map(|e| e.handle.clone())
            .collect()
    }

    /// Copy of one running execution.
    #[must_use]
    pub fn execution(&self, id: &str) -> Option<WorkExecution> {
        self.running.lock().get(id).cloned()
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> SchedulerConfig {
        self.config.read().clone()
    }

    /// Replace the configuration; takes effect on the next tick.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidConfig` if `config` fails validation.
    pub fn update_config(&self, config: SchedulerConfig) -> Result<(), SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        info!(policy = ?config.policy, "scheduler configuration updated");
        *self.config.write() = config;
        Ok(())
    }

    /// Switch the scheduling policy.
    pub fn set_policy(&self, policy: SchedulingPolicy) {
        self.config.write().policy = policy;
        info!(?policy, "scheduling policy changed");
    }

    /// Replace the shares of the given tiers.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidConfig` if a resulting percentage exceeds 100.
    pub fn update_allocation_strategy(
        &self,
        changes: impl IntoIterator<Item = (Priority, TierShare)>,
    ) -> Result<(), SchedulerError> {
        self.resources.update_allocation_strategy(changes)
    }

    /// Replace the global caps.
    pub fn update_system_resources(&self, system: SystemResources) {
        self.resources.update_system_resources(system);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "tick panicked".to_string())
}
