//! Tests for scheduler builders

use std::sync::Arc;

use prometheus_tier_scheduler::builders::{build_scheduler, SchedulerBuilder};
use prometheus_tier_scheduler::config::{SchedulerConfig, SchedulerSettings};
use prometheus_tier_scheduler::core::{
    AllocationStrategy, NoopExecutionHook, SchedulerError, SystemResources, TierShare, WorkItem,
};
use prometheus_tier_scheduler::infra::TieredQueue;
use prometheus_tier_scheduler::util::Priority;

#[test]
fn test_build_scheduler_from_settings() {
    let settings = SchedulerSettings {
        system: SystemResources {
            max_concurrency: 100,
            ..SystemResources::default()
        },
        ..SchedulerSettings::default()
    };
    let scheduler = build_scheduler(&settings, Arc::new(NoopExecutionHook)).unwrap();

    assert_eq!(scheduler.resources().system_resources().max_concurrency, 100);
    assert_eq!(scheduler.resources().max_allocation(Priority::Normal).concurrency, 15);
    let status = scheduler.status();
    assert!(!status.is_running);
    assert_eq!(status.queue.total, 0);
    assert_eq!(status.resources.len(), 5);
}

#[test]
fn test_builder_rejects_invalid_settings() {
    let result = SchedulerBuilder::new()
        .config(SchedulerConfig {
            starvation_threshold_secs: 0,
            ..SchedulerConfig::default()
        })
        .build();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));

    let result = SchedulerBuilder::new()
        .strategy(AllocationStrategy::from_shares([(
            Priority::High,
            TierShare::uniform(150),
        )]))
        .build();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_builder_shares_an_existing_queue() {
    let queue = Arc::new(TieredQueue::new());
    queue.put(WorkItem::new("pre-existing", Priority::Normal));

    let scheduler = SchedulerBuilder::new()
        .queue(Arc::clone(&queue))
        .system_resources(SystemResources::default())
        .build()
        .unwrap();

    assert_eq!(scheduler.status().queue.total, 1);
    let report = scheduler.tick().unwrap();
    assert_eq!(report.admitted.as_deref(), Some("pre-existing"));
    assert!(queue.is_empty());
}
