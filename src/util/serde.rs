//! Serializable domain primitives shared by the queue, resource manager and scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task identifier.
pub type TaskId = String;

/// Priority tier of a unit of work.
///
/// Tiers are ordinal: `Critical` (1) is the highest priority and `Background` (5)
/// the lowest. The derived ordering follows the numeric value, so a *smaller*
/// `Priority` is scheduled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Tier 1, never preempted.
    Critical = 1,
    /// Tier 2, also the target tier for starvation promotion.
    High = 2,
    /// Tier 3.
    Normal = 3,
    /// Tier 4, preemptible.
    Low = 4,
    /// Tier 5, runs when the system is otherwise idle.
    Background = 5,
}

impl Priority {
    /// All tiers, highest priority first.
    pub const ALL: [Self; 5] = [
        Self::Critical,
        Self::High,
        Self::Normal,
        Self::Low,
        Self::Background,
    ];

    /// Numeric tier value (1 = highest).
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Zero-based slot used to index per-tier arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize - 1
    }

    /// Parse a numeric tier value.
    #[must_use]
    pub const fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Critical),
            2 => Some(Self::High),
            3 => Some(Self::Normal),
            4 => Some(Self::Low),
            5 => Some(Self::Background),
            _ => None,
        }
    }

    /// Whether this tier may trigger preemption of lower tiers.
    #[must_use]
    pub const fn is_preemptive(self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Background => "background",
        };
        f.write_str(name)
    }
}

/// The five scarce quantities arbitrated by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Connection slots.
    Connections,
    /// Bandwidth in KB/s.
    Bandwidth,
    /// Concurrency slots.
    Concurrency,
    /// Disk I/O in MB/s.
    DiskIo,
    /// Memory in MB.
    Memory,
}

impl ResourceKind {
    /// Every resource kind.
    pub const ALL: [Self; 5] = [
        Self::Connections,
        Self::Bandwidth,
        Self::Concurrency,
        Self::DiskIo,
        Self::Memory,
    ];
}

/// Five non-negative resource quantities.
///
/// The same shape describes a capacity, a per-tier quota, a usage snapshot or
/// the amount granted to one running item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    /// Connection slots.
    pub connections: u64,
    /// Bandwidth in KB/s.
    pub bandwidth_kbps: u64,
    /// Concurrency slots.
    pub concurrency: u64,
    /// Disk I/O in MB/s.
    pub disk_io_mbps: u64,
    /// Memory in MB.
    pub memory_mb: u64,
}

impl ResourceAllocation {
    /// The empty allocation.
    pub const ZERO: Self = Self {
        connections: 0,
        bandwidth_kbps: 0,
        concurrency: 0,
        disk_io_mbps: 0,
        memory_mb: 0,
    };

    /// Read one quantity.
    #[must_use]
    pub const fn get(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Connections => self.connections,
            ResourceKind::Bandwidth => self.bandwidth_kbps,
            ResourceKind::Concurrency => self.concurrency,
            ResourceKind::DiskIo => self.disk_io_mbps,
            ResourceKind::Memory => self.memory_mb,
        }
    }

    /// Overwrite one quantity.
    pub fn set(&mut self, kind: ResourceKind, value: u64) {
        match kind {
            ResourceKind::Connections => self.connections = value,
            ResourceKind::Bandwidth => self.bandwidth_kbps = value,
            ResourceKind::Concurrency => self.concurrency = value,
            ResourceKind::DiskIo => self.disk_io_mbps = value,
            ResourceKind::Memory => self.memory_mb = value,
        }
    }

    /// Build an allocation by evaluating `f` for every kind.
    #[must_use]
    pub fn from_fn(mut f: impl FnMut(ResourceKind) -> u64) -> Self {
        let mut out = Self::ZERO;
        for kind in ResourceKind::ALL {
            out.set(kind, f(kind));
        }
        out
    }

    /// Element-wise saturating addition.
    #[must_use]
    pub fn saturating_add(&self, other: &Self) -> Self {
        Self::from_fn(|k| self.get(k).saturating_add(other.get(k)))
    }

    /// Element-wise subtraction clamped at zero.
    #[must_use]
    pub fn saturating_sub(&self, other: &Self) -> Self {
        Self::from_fn(|k| self.get(k).saturating_sub(other.get(k)))
    }

    /// True iff every quantity is `<=` the matching quantity in `limit`.
    #[must_use]
    pub fn fits_within(&self, limit: &Self) -> bool {
        ResourceKind::ALL
            .iter()
            .all(|&k| self.get(k) <= limit.get(k))
    }

    /// True iff every quantity is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}
