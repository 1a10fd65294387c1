//! Work descriptors submitted by producers.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;
use crate::util::serde::{Priority, ResourceKind, TaskId};

/// Default retry budget for failed work.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A pending unit of work.
///
/// Items order by tier first and by `created_at_ms` within a tier (FIFO).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier.
    pub id: TaskId,
    /// Priority tier.
    pub priority: Priority,
    /// Submission time in milliseconds since the epoch.
    pub created_at_ms: u128,
    /// Producer's estimate of the run time, in seconds.
    #[serde(default)]
    pub estimated_duration_secs: u64,
    /// Explicit per-quantity overrides of the computed requirement.
    #[serde(default)]
    pub resource_requirements: BTreeMap<ResourceKind, u64>,
    /// Times this item has been retried after failing.
    #[serde(default)]
    pub retry_count: u32,
    /// Retry budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl WorkItem {
    /// Create an item with the given id, stamped with the current time.
    pub fn new(id: impl Into<TaskId>, priority: Priority) -> Self {
        Self {
            id: id.into(),
            priority,
            created_at_ms: now_ms(),
            estimated_duration_secs: 0,
            resource_requirements: BTreeMap::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Create an item with a random v4 UUID as its id.
    #[must_use]
    pub fn with_generated_id(priority: Priority) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), priority)
    }

    /// Override the submission timestamp.
    #[must_use]
    pub const fn created_at(mut self, created_at_ms: u128) -> Self {
        self.created_at_ms = created_at_ms;
        self
    }

    /// Set the estimated duration.
    #[must_use]
    pub const fn estimated_duration(mut self, secs: u64) -> Self {
        self.estimated_duration_secs = secs;
        self
    }

    /// Override one resource quantity.
    #[must_use]
    pub fn require(mut self, kind: ResourceKind, amount: u64) -> Self {
        self.resource_requirements.insert(kind, amount);
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether another retry is allowed.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Scheduling order: tier, then submission time.
    #[must_use]
    pub fn schedule_cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.created_at_ms.cmp(&other.created_at_ms))
    }
}
