//! Scheduler configuration structures.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{AllocationStrategy, SystemResources};

/// Prefix of the environment variables read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "TIER_SCHEDULER_";

/// How the loop picks and admits work each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    /// Tiered dequeue with preemption for CRITICAL/HIGH work.
    #[default]
    PriorityPreemptive,
    /// Single best-item dequeue, no preemption.
    RoundRobin,
    /// Single best-item dequeue, no preemption.
    FairShare,
    /// Preemptive under load, fair-share otherwise.
    Adaptive,
}

impl FromStr for SchedulingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "priority_preemptive" => Ok(Self::PriorityPreemptive),
            "round_robin" => Ok(Self::RoundRobin),
            "fair_share" => Ok(Self::FairShare),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(format!("unknown scheduling policy `{other}`")),
        }
    }
}

/// Response to an item whose requirement can never fit a reachable tier quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizedPolicy {
    /// Drop the item at admission time.
    #[default]
    Reject,
    /// Keep retrying indefinitely.
    Retry,
}

impl FromStr for OversizedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(Self::Reject),
            "retry" => Ok(Self::Retry),
            other => Err(format!("unknown oversized policy `{other}`")),
        }
    }
}

/// Tunables of the control loop. All of them can be changed at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Loop period in milliseconds.
    pub tick_interval_ms: u64,
    /// Wait after a first denial before the one-time promotion to HIGH.
    pub starvation_threshold_secs: u64,
    /// Whether CRITICAL/HIGH work may evict lower tiers.
    pub preemption_enabled: bool,
    /// Preemption budget over any rolling 60 seconds.
    pub max_preemptions_per_minute: u32,
    /// Active policy.
    pub policy: SchedulingPolicy,
    /// Aggregate concurrency utilization (percent) above which `Adaptive` preempts.
    pub adaptive_load_threshold_pct: f64,
    /// Sleep after a failed tick, in milliseconds.
    pub fault_backoff_ms: u64,
    /// Consecutive failed ticks tolerated before the loop stops.
    pub max_consecutive_faults: u32,
    /// Handling of never-admittable items.
    pub oversized_policy: OversizedPolicy,
    /// Requeue failed items while they have retries left.
    pub retry_failed: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            starvation_threshold_secs: 300,
            preemption_enabled: true,
            max_preemptions_per_minute: 5,
            policy: SchedulingPolicy::PriorityPreemptive,
            adaptive_load_threshold_pct: 80.0,
            fault_backoff_ms: 5000,
            max_consecutive_faults: 10,
            oversized_policy: OversizedPolicy::Reject,
            retry_failed: false,
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        if self.starvation_threshold_secs == 0 {
            return Err("starvation_threshold_secs must be greater than 0".into());
        }
        if !(0.0..=100.0).contains(&self.adaptive_load_threshold_pct) {
            return Err("adaptive_load_threshold_pct must be within 0..=100".into());
        }
        if self.max_consecutive_faults == 0 {
            return Err("max_consecutive_faults must be greater than 0".into());
        }
        Ok(())
    }

    /// Loop period.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Backoff after a failed tick.
    #[must_use]
    pub const fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }

    /// Starvation threshold in milliseconds.
    #[must_use]
    pub fn starvation_threshold_ms(&self) -> u128 {
        u128::from(self.starvation_threshold_secs) * 1000
    }

    /// Parse from a JSON string and validate. Unknown keys are rejected.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build from `TIER_SCHEDULER_*` environment variables on top of the defaults.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Build from an arbitrary key lookup (keys without the prefix).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, String> {
            raw.trim()
                .parse()
                .map_err(|_| format!("{ENV_PREFIX}{key}: cannot parse `{raw}`"))
        }

        let mut cfg = Self::default();
        if let Some(v) = lookup("TICK_INTERVAL_MS") {
            cfg.tick_interval_ms = parse("TICK_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("STARVATION_THRESHOLD_SECS") {
            cfg.starvation_threshold_secs = parse("STARVATION_THRESHOLD_SECS", &v)?;
        }
        if let Some(v) = lookup("PREEMPTION_ENABLED") {
            cfg.preemption_enabled = parse("PREEMPTION_ENABLED", &v)?;
        }
        if let Some(v) = lookup("MAX_PREEMPTIONS_PER_MINUTE") {
            cfg.max_preemptions_per_minute = parse("MAX_PREEMPTIONS_PER_MINUTE", &v)?;
        }
        if let Some(v) = lookup("POLICY") {
            cfg.policy = v.trim().parse()?;
        }
        if let Some(v) = lookup("ADAPTIVE_LOAD_THRESHOLD_PCT") {
            cfg.adaptive_load_threshold_pct = parse("ADAPTIVE_LOAD_THRESHOLD_PCT", &v)?;
        }
        if let Some(v) = lookup("FAULT_BACKOFF_MS") {
            cfg.fault_backoff_ms = parse("FAULT_BACKOFF_MS", &v)?;
        }
        if let Some(v) = lookup("MAX_CONSECUTIVE_FAULTS") {
            cfg.max_consecutive_faults = parse("MAX_CONSECUTIVE_FAULTS", &v)?;
        }
        if let Some(v) = lookup("OVERSIZED_POLICY") {
            cfg.oversized_policy = v.trim().parse()?;
        }
        if let Some(v) = lookup("RETRY_FAILED") {
            cfg.retry_failed = parse("RETRY_FAILED", &v)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Root configuration document: loop tunables, global caps and tier shares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerSettings {
    /// Control-loop tunables.
    pub scheduler: SchedulerConfig,
    /// Global caps.
    pub system: SystemResources,
    /// Per-tier shares.
    pub strategy: AllocationStrategy,
}

impl SchedulerSettings {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        self.strategy
            .validate()
            .map_err(|e| format!("strategy invalid: {e}"))?;
        Ok(())
    }

    /// Parse settings from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let settings: Self =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        settings.validate()?;
        Ok(settings)
    }
}
