//! Tests for configuration validation and loading

use std::collections::HashMap;

use prometheus_tier_scheduler::config::{
    OversizedPolicy, SchedulerConfig, SchedulerSettings, SchedulingPolicy,
};
use prometheus_tier_scheduler::core::{AllocationStrategy, TierShare};
use prometheus_tier_scheduler::util::{Priority, ResourceKind};

#[test]
fn test_defaults_are_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.tick_interval_ms, 1000);
    assert_eq!(cfg.starvation_threshold_secs, 300);
    assert_eq!(cfg.max_preemptions_per_minute, 5);
    assert_eq!(cfg.policy, SchedulingPolicy::PriorityPreemptive);
    assert_eq!(cfg.oversized_policy, OversizedPolicy::Reject);
    assert_eq!(cfg.starvation_threshold_ms(), 300_000);
}

#[test]
fn test_invalid_values_are_rejected() {
    let zero_tick = SchedulerConfig {
        tick_interval_ms: 0,
        ..SchedulerConfig::default()
    };
    assert!(zero_tick.validate().is_err());

    let bad_threshold = SchedulerConfig {
        adaptive_load_threshold_pct: 120.0,
        ..SchedulerConfig::default()
    };
    assert!(bad_threshold.validate().is_err());

    let no_faults = SchedulerConfig {
        max_consecutive_faults: 0,
        ..SchedulerConfig::default()
    };
    assert!(no_faults.validate().is_err());
}

#[test]
fn test_from_json_rejects_unknown_keys() {
    let json = r#"{"policy": "round_robin", "tick_interval_ms": 250}"#;
    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.policy, SchedulingPolicy::RoundRobin);
    assert_eq!(cfg.tick_interval_ms, 250);
    assert_eq!(cfg.starvation_threshold_secs, 300);

    let err = SchedulerConfig::from_json_str(r#"{"tick_intervall_ms": 250}"#).unwrap_err();
    assert!(err.contains("parse error"));
}

#[test]
fn test_from_lookup_reads_prefixed_keys() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("POLICY", "adaptive"),
        ("MAX_PREEMPTIONS_PER_MINUTE", " 2 "),
        ("RETRY_FAILED", "true"),
        ("OVERSIZED_POLICY", "retry"),
    ]);
    let cfg = SchedulerConfig::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();
    assert_eq!(cfg.policy, SchedulingPolicy::Adaptive);
    assert_eq!(cfg.max_preemptions_per_minute, 2);
    assert!(cfg.retry_failed);
    assert_eq!(cfg.oversized_policy, OversizedPolicy::Retry);

    let only = |key: &'static str, value: &'static str| {
        move |k: &str| (k == key).then(|| value.to_string())
    };
    let err = SchedulerConfig::from_lookup(only("TICK_INTERVAL_MS", "soon")).unwrap_err();
    assert!(err.contains("TIER_SCHEDULER_TICK_INTERVAL_MS"));

    assert!(SchedulerConfig::from_lookup(only("POLICY", "lottery")).is_err());
}

#[test]
fn test_settings_merge_partial_strategy_onto_defaults() {
    let settings = SchedulerSettings::from_json_str(
        r#"{
            "system": {"max_concurrency": 20},
            "strategy": {
                "low": {"connections_pct": 10, "bandwidth_pct": 10, "concurrency_pct": 10, "disk_io_pct": 10, "memory_pct": 10}
            }
        }"#,
    )
    .unwrap();

    assert_eq!(settings.system.max_concurrency, 20);
    assert_eq!(settings.system.max_connections, 20);
    assert_eq!(settings.strategy.share(Priority::Low), TierShare::uniform(10));
    assert_eq!(
        settings.strategy.share(Priority::Critical),
        AllocationStrategy::default().share(Priority::Critical)
    );
}

#[test]
fn test_settings_reject_share_above_hundred() {
    let err = SchedulerSettings::from_json_str(
        r#"{"strategy": {"high": {"connections_pct": 101, "bandwidth_pct": 0, "concurrency_pct": 0, "disk_io_pct": 0, "memory_pct": 0}}}"#,
    )
    .unwrap_err();
    assert!(err.contains("strategy invalid"));
}

#[test]
fn test_oversubscription_is_reported() {
    assert!(AllocationStrategy::default().oversubscribed().is_empty());

    let greedy = AllocationStrategy::from_shares([
        (Priority::Critical, TierShare::uniform(60)),
        (Priority::High, TierShare::uniform(60)),
    ]);
    assert!(greedy.validate().is_ok());
    let over = greedy.oversubscribed();
    assert_eq!(over.len(), ResourceKind::ALL.len());
    assert!(over.iter().all(|&(_, sum)| sum == 120));
}
