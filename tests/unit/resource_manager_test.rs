//! Randomized tests for resource accounting

use prometheus_tier_scheduler::core::{ResourceManager, SchedulerError};
use prometheus_tier_scheduler::util::{Priority, ResourceAllocation, ResourceKind};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn small_request(rng: &mut StdRng) -> ResourceAllocation {
    ResourceAllocation::from_fn(|kind| match kind {
        ResourceKind::Bandwidth => rng.random_range(0..600),
        ResourceKind::Memory => rng.random_range(0..50),
        _ => rng.random_range(0..2),
    })
}

#[test]
fn test_matched_allocate_release_conserves_usage() {
    let mut rng = StdRng::seed_from_u64(7);
    let manager = ResourceManager::default();
    let baseline: Vec<_> = Priority::ALL.iter().map(|&t| manager.usage(t)).collect();

    let mut granted = Vec::new();
    for n in 0..200 {
        let tier = Priority::ALL[rng.random_range(0..5)];
        let request = small_request(&mut rng);
        let id = format!("task-{n}");
        match manager.allocate(&id, tier, request) {
            Ok(()) => granted.push((id, tier)),
            Err(SchedulerError::ResourceExhausted { tier: denied }) => assert_eq!(denied, tier),
            Err(other) => panic!("unexpected error {other}"),
        }
        for t in Priority::ALL {
            assert!(manager.usage(t).fits_within(&manager.max_allocation(t)));
        }
    }
    assert!(!granted.is_empty());

    granted.shuffle(&mut rng);
    for (id, tier) in &granted {
        assert!(manager.release(id, *tier, None).is_some());
    }

    let after: Vec<_> = Priority::ALL.iter().map(|&t| manager.usage(t)).collect();
    assert_eq!(after, baseline);
    assert!(Priority::ALL.iter().all(|&t| manager.active_tasks(t).is_empty()));
}

#[test]
fn test_can_allocate_never_mutates() {
    let mut rng = StdRng::seed_from_u64(11);
    let manager = ResourceManager::default();
    manager
        .allocate("seed", Priority::Normal, ResourceAllocation::from_fn(|_| 1))
        .unwrap();
    let before = manager.status();

    for _ in 0..100 {
        let tier = Priority::ALL[rng.random_range(0..5)];
        let _ = manager.can_allocate(tier, &small_request(&mut rng));
    }
    assert_eq!(manager.status(), before);
}

#[test]
fn test_duplicate_allocation_and_unknown_release() {
    let manager = ResourceManager::default();
    let one = ResourceAllocation::from_fn(|_| 1);
    manager.allocate("a", Priority::High, one).unwrap();
    assert_eq!(
        manager.allocate("a", Priority::High, one),
        Err(SchedulerError::AlreadyAllocated("a".into()))
    );
    assert_eq!(manager.task_allocation("a"), Some(one));

    assert!(manager.release("missing", Priority::High, None).is_none());
    assert_eq!(manager.usage(Priority::High), one);

    // Releasing under the wrong tier still credits the tier that was charged.
    assert_eq!(manager.release("a", Priority::Low, None), Some(one));
    assert!(manager.usage(Priority::High).is_zero());
}

#[test]
fn test_quota_is_floor_of_share() {
    let manager = ResourceManager::default();
    let low = manager.max_allocation(Priority::Low);
    // 4% of 10 slots rounds down to zero.
    assert_eq!(low.concurrency, 0);
    assert_eq!(low.connections, 1);
    assert_eq!(manager.max_allocation(Priority::Critical).bandwidth_kbps, 5120);

    let total = manager.total_usage();
    assert!(total.total_usage.is_zero());
    assert!(total.utilization.concurrency.abs() < f64::EPSILON);
}
