//! Per-tier resource quotas and admission accounting.
//!
//! Global caps ([`SystemResources`]) are split into per-tier quotas by an
//! [`AllocationStrategy`]. Every tier's percentages are evaluated
//! independently against the global cap, so the quotas may jointly exceed
//! capacity; [`AllocationStrategy::oversubscribed`] reports where.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::util::serde::{Priority, ResourceAllocation, ResourceKind, TaskId};

/// Global hard caps for the five quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SystemResources {
    /// Connection slots.
    pub max_connections: u64,
    /// Bandwidth in KB/s.
    pub max_bandwidth_kbps: u64,
    /// Concurrency slots.
    pub max_concurrency: u64,
    /// Disk I/O in MB/s.
    pub max_disk_io_mbps: u64,
    /// Memory in MB.
    pub max_memory_mb: u64,
}

impl Default for SystemResources {
    fn default() -> Self {
        Self {
            max_connections: 20,
            max_bandwidth_kbps: 10_240,
            max_concurrency: 10,
            max_disk_io_mbps: 100,
            max_memory_mb: 1024,
        }
    }
}

impl SystemResources {
    /// Caps expressed as an allocation.
    #[must_use]
    pub const fn as_allocation(&self) -> ResourceAllocation {
        ResourceAllocation {
            connections: self.max_connections,
            bandwidth_kbps: self.max_bandwidth_kbps,
            concurrency: self.max_concurrency,
            disk_io_mbps: self.max_disk_io_mbps,
            memory_mb: self.max_memory_mb,
        }
    }
}

/// Percentage of each global cap granted to one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierShare {
    /// Percent of connection slots.
    pub connections_pct: u8,
    /// Percent of bandwidth.
    pub bandwidth_pct: u8,
    /// Percent of concurrency slots.
    pub concurrency_pct: u8,
    /// Percent of disk I/O.
    pub disk_io_pct: u8,
    /// Percent of memory.
    pub memory_pct: u8,
}

impl TierShare {
    /// Same percentage for every quantity.
    #[must_use]
    pub const fn uniform(pct: u8) -> Self {
        Self {
            connections_pct: pct,
            bandwidth_pct: pct,
            concurrency_pct: pct,
            disk_io_pct: pct,
            memory_pct: pct,
        }
    }

    /// Percentage for one quantity.
    #[must_use]
    pub const fn get(&self, kind: ResourceKind) -> u8 {
        match kind {
            ResourceKind::Connections => self.connections_pct,
            ResourceKind::Bandwidth => self.bandwidth_pct,
            ResourceKind::Concurrency => self.concurrency_pct,
            ResourceKind::DiskIo => self.disk_io_pct,
            ResourceKind::Memory => self.memory_pct,
        }
    }
}

/// Tier-to-share table.
///
/// Deserializing a partial table fills the missing tiers from the default table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<Priority, TierShare>",
    into = "BTreeMap<Priority, TierShare>"
)]
pub struct AllocationStrategy {
    shares: BTreeMap<Priority, TierShare>,
}

impl From<BTreeMap<Priority, TierShare>> for AllocationStrategy {
    fn from(shares: BTreeMap<Priority, TierShare>) -> Self {
        let mut strategy = Self::default();
        strategy.merge(shares);
        strategy
    }
}

impl From<AllocationStrategy> for BTreeMap<Priority, TierShare> {
    fn from(strategy: AllocationStrategy) -> Self {
        strategy.shares
    }
}

impl Default for AllocationStrategy {
    fn default() -> Self {
        let share = |c, b, t, d, m| TierShare {
            connections_pct: c,
            bandwidth_pct: b,
            concurrency_pct: t,
            disk_io_pct: d,
            memory_pct: m,
        };
        Self {
            shares: BTreeMap::from([
                (Priority::Critical, share(40, 50, 50, 40, 40)),
                (Priority::High, share(30, 30, 30, 30, 30)),
                (Priority::Normal, share(20, 15, 15, 20, 20)),
                (Priority::Low, share(8, 4, 4, 8, 8)),
                (Priority::Background, share(2, 1, 1, 2, 2)),
            ]),
        }
    }
}

impl AllocationStrategy {
    /// Build a strategy from explicit entries; tiers left out get a zero share.
    pub fn from_shares(shares: impl IntoIterator<Item = (Priority, TierShare)>) -> Self {
        let mut table: BTreeMap<_, _> = Priority::ALL
            .iter()
            .map(|&p| (p, TierShare::uniform(0)))
            .collect();
        table.extend(shares);
        Self { shares: table }
    }

    /// Share for a tier.
    #[must_use]
    pub fn share(&self, tier: Priority) -> TierShare {
        self.shares
            .get(&tier)
            .copied()
            .unwrap_or(TierShare::uniform(0))
    }

    /// Replace the shares of the given tiers, keeping the rest.
    pub fn merge(&mut self, changes: impl IntoIterator<Item = (Priority, TierShare)>) {
        self.shares.extend(changes);
    }

    /// Reject percentages above 100.
    pub fn validate(&self) -> Result<(), String> {
        for (tier, share) in &self.shares {
            for kind in ResourceKind::ALL {
                if share.get(kind) > 100 {
                    return Err(format!(
                        "tier `{tier}` {kind:?} share {}% exceeds 100%",
                        share.get(kind)
                    ));
                }
            }
        }
        Ok(())
    }

    /// Quantities whose shares across all tiers sum past 100%, with the sum.
    #[must_use]
    pub fn oversubscribed(&self) -> Vec<(ResourceKind, u32)> {
        ResourceKind::ALL
            .iter()
            .filter_map(|&kind| {
                let sum: u32 = self.shares.values().map(|s| u32::from(s.get(kind))).sum();
                (sum > 100).then_some((kind, sum))
            })
            .collect()
    }
}

/// Percentage utilization per quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    /// Connection slots in use, percent.
    pub connections: f64,
    /// Bandwidth in use, percent.
    pub bandwidth: f64,
    /// Concurrency slots in use, percent.
    pub concurrency: f64,
    /// Disk I/O in use, percent.
    pub disk_io: f64,
    /// Memory in use, percent.
    pub memory: f64,
}

impl Utilization {
    #[allow(clippy::cast_precision_loss)]
    fn of(used: &ResourceAllocation, cap: &ResourceAllocation) -> Self {
        let pct = |k| used.get(k) as f64 / cap.get(k).max(1) as f64 * 100.0;
        Self {
            connections: pct(ResourceKind::Connections),
            bandwidth: pct(ResourceKind::Bandwidth),
            concurrency: pct(ResourceKind::Concurrency),
            disk_io: pct(ResourceKind::DiskIo),
            memory: pct(ResourceKind::Memory),
        }
    }
}

/// Status of one tier's quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierResourceStatus {
    /// Quota derived from caps and strategy.
    pub max_allocation: ResourceAllocation,
    /// Amount currently granted.
    pub current_usage: ResourceAllocation,
    /// Usage relative to the quota.
    pub utilization: Utilization,
    /// Tasks holding an allocation in this tier.
    pub active_tasks: usize,
    /// Headroom left in the quota.
    pub available: ResourceAllocation,
}

/// Aggregate usage across all tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalUsage {
    /// Sum of every tier's usage.
    pub total_usage: ResourceAllocation,
    /// Global caps.
    pub system_resources: SystemResources,
    /// Aggregate usage relative to the global caps.
    pub utilization: Utilization,
}

struct ResourceState {
    system: SystemResources,
    strategy: AllocationStrategy,
    usage: [ResourceAllocation; 5],
    active: [Vec<TaskId>; 5],
    allocations: HashMap<TaskId, (Priority, ResourceAllocation)>,
}

impl ResourceState {
    fn max_allocation(&self, tier: Priority) -> ResourceAllocation {
        let cap = self.system.as_allocation();
        let share = self.strategy.share(tier);
        ResourceAllocation::from_fn(|k| {
            let quota = u128::from(cap.get(k)) * u128::from(share.get(k)) / 100;
            u64::try_from(quota).unwrap_or(u64::MAX)
        })
    }

    fn can_allocate(&self, tier: Priority, required: &ResourceAllocation) -> bool {
        self.usage[tier.index()]
            .saturating_add(required)
            .fits_within(&self.max_allocation(tier))
    }

    fn available(&self, tier: Priority) -> ResourceAllocation {
        self.max_allocation(tier)
            .saturating_sub(&self.usage[tier.index()])
    }

    fn total(&self) -> ResourceAllocation {
        self.usage
            .iter()
            .fold(ResourceAllocation::ZERO, |acc, u| acc.saturating_add(u))
    }
}

/// Tracks per-tier consumption against quotas and gates admission.
///
/// Mutations share one coarse lock per instance.
pub struct ResourceManager {
    state: Mutex<ResourceState>,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::with_state(SystemResources::default(), AllocationStrategy::default())
    }
}

impl ResourceManager {
    /// Create a manager for the given caps and strategy.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidConfig` if a share exceeds 100%.
    pub fn new(
        system: SystemResources,
        strategy: AllocationStrategy,
    ) -> Result<Self, SchedulerError> {
        strategy.validate().map_err(SchedulerError::InvalidConfig)?;
        warn_if_oversubscribed(&strategy);
        Ok(Self::with_state(system, strategy))
    }

    fn with_state(system: SystemResources, strategy: AllocationStrategy) -> Self {
        Self {
            state: Mutex::new(ResourceState {
                system,
                strategy,
                usage: [ResourceAllocation::ZERO; 5],
                active: Default::default(),
                allocations: HashMap::new(),
            }),
        }
    }

    /// Quota for a tier: `floor(cap * pct / 100)` per quantity, saturating at `u64::MAX`.
    pub fn max_allocation(&self, tier: Priority) -> ResourceAllocation {
        self.state.lock().max_allocation(tier)
    }

    /// Whether `required` fits in the tier's remaining quota. Never mutates.
    pub fn can_allocate(&self, tier: Priority, required: &ResourceAllocation) -> bool {
        self.state.lock().can_allocate(tier, required)
    }

    /// Reserve `required` for `task_id` against the tier's quota.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::AlreadyAllocated` if the task already holds resources
    /// - `SchedulerError::ResourceExhausted` if the quota cannot absorb the request
    pub fn allocate(
        &self,
        task_id: &str,
        tier: Priority,
        required: ResourceAllocation,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        if state.allocations.contains_key(task_id) {
            return Err(SchedulerError::AlreadyAllocated(task_id.to_string()));
        }
        if !state.can_allocate(tier, &required) {
            return Err(SchedulerError::ResourceExhausted { tier });
        }
        let slot = tier.index();
        state.usage[slot] = state.usage[slot].saturating_add(&required);
        state.active[slot].push(task_id.to_string());
        state
            .allocations
            .insert(task_id.to_string(), (tier, required));
        Ok(())
    }

    /// Return a task's resources to the tier it was charged against.
    ///
    /// `allocated` overrides the recorded amount. Usage is clamped at zero per
    /// quantity. Unknown tasks are a no-op and yield `None`.
    pub fn release(
        &self,
        task_id: &str,
        tier: Priority,
        allocated: Option<&ResourceAllocation>,
    ) -> Option<ResourceAllocation> {
        let mut state = self.state.lock();
        let (recorded_tier, recorded) = state.allocations.remove(task_id)?;
        if recorded_tier != tier {
            tracing::warn!(
                task_id,
                %tier,
                %recorded_tier,
                "release tier differs from allocation tier; using recorded tier"
            );
        }
        let amount = allocated.copied().unwrap_or(recorded);
        let slot = recorded_tier.index();
        state.usage[slot] = state.usage[slot].saturating_sub(&amount);
        state.active[slot].retain(|id| id != task_id);
        Some(amount)
    }

    /// Current usage for a tier.
    pub fn usage(&self, tier: Priority) -> ResourceAllocation {
        self.state.lock().usage[tier.index()]
    }

    /// Remaining headroom for a tier.
    pub fn available(&self, tier: Priority) -> ResourceAllocation {
        self.state.lock().available(tier)
    }

    /// Allocation recorded for a task.
    pub fn task_allocation(&self, task_id: &str) -> Option<ResourceAllocation> {
        self.state
            .lock()
            .allocations
            .get(task_id)
            .map(|(_, amount)| *amount)
    }

    /// Ids holding an allocation in a tier, oldest first.
    pub fn active_tasks(&self, tier: Priority) -> Vec<TaskId> {
        self.state.lock().active[tier.index()].clone()
    }

    /// Per-tier quota, usage, utilization and headroom.
    pub fn status(&self) -> BTreeMap<Priority, TierResourceStatus> {
        let state = self.state.lock();
        Priority::ALL
            .iter()
            .map(|&tier| {
                let max_allocation = state.max_allocation(tier);
                let current_usage = state.usage[tier.index()];
                (
                    tier,
                    TierResourceStatus {
                        max_allocation,
                        current_usage,
                        utilization: Utilization::of(&current_usage, &max_allocation),
                        active_tasks: state.active[tier.index()].len(),
                        available: state.available(tier),
                    },
                )
            })
            .collect()
    }

    /// Aggregate usage against the global caps.
    pub fn total_usage(&self) -> TotalUsage {
        let state = self.state.lock();
        let total_usage = state.total();
        TotalUsage {
            total_usage,
            system_resources: state.system,
            utilization: Utilization::of(&total_usage, &state.system.as_allocation()),
        }
    }

    /// Current global caps.
    pub fn system_resources(&self) -> SystemResources {
        self.state.lock().system
    }

    /// Current strategy.
    pub fn allocation_strategy(&self) -> AllocationStrategy {
        self.state.lock().strategy.clone()
    }

    /// Replace the shares of the given tiers.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidConfig` if a resulting percentage exceeds 100;
    /// the strategy is left unchanged in that case.
    pub fn update_allocation_strategy(
        &self,
        changes: impl IntoIterator<Item = (Priority, TierShare)>,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        let mut next = state.strategy.clone();
        next.merge(changes);
        next.validate().map_err(SchedulerError::InvalidConfig)?;
        warn_if_oversubscribed(&next);
        state.strategy = next;
        tracing::info!("allocation strategy updated");
        Ok(())
    }

    /// Replace the global caps. Existing allocations are kept as they are.
    pub fn update_system_resources(&self, system: SystemResources) {
        self.state.lock().system = system;
        tracing::info!(?system, "system resources updated");
    }
}

fn warn_if_oversubscribed(strategy: &AllocationStrategy) {
    for (kind, sum) in strategy.oversubscribed() {
        tracing::warn!(?kind, sum, "tier shares oversubscribe global capacity");
    }
}
