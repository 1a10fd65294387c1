//! Randomized tests for the tiered queue

use std::collections::HashSet;

use prometheus_tier_scheduler::core::WorkItem;
use prometheus_tier_scheduler::infra::TieredQueue;
use prometheus_tier_scheduler::util::Priority;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_item(rng: &mut StdRng, id: usize) -> WorkItem {
    let tier = Priority::ALL[rng.random_range(0..Priority::ALL.len())];
    WorkItem::new(format!("task-{id}"), tier).created_at(rng.random_range(0..10_000u128))
}

#[test]
fn test_pop_order_is_tier_then_submission_time() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let queue = TieredQueue::new();
    for id in 0..500 {
        queue.put(random_item(&mut rng, id));
    }

    let mut previous: Option<(Priority, u128)> = None;
    let mut popped = 0;
    while let Some(item) = queue.pop() {
        let key = (item.priority, item.created_at_ms);
        if let Some(prev) = previous {
            assert!(prev <= key, "{prev:?} popped before {key:?}");
        }
        previous = Some(key);
        popped += 1;
    }
    assert_eq!(popped, 500);
    assert!(queue.is_empty());
}

#[test]
fn test_removed_ids_never_come_back() {
    let mut rng = StdRng::seed_from_u64(42);
    let queue = TieredQueue::new();
    for id in 0..300 {
        queue.put(random_item(&mut rng, id));
    }

    let mut removed = HashSet::new();
    for id in 0..300 {
        if rng.random_bool(0.4) {
            let before = queue.len();
            let name = format!("task-{id}");
            assert!(queue.remove(&name));
            assert_eq!(queue.len(), before - 1);
            assert!(!queue.contains(&name));
            removed.insert(name);
        }
    }
    assert!(!queue.remove("task-unknown"));

    let mut seen = 0;
    while let Some(item) = queue.pop() {
        assert!(!removed.contains(&item.id), "{} resurfaced", item.id);
        seen += 1;
    }
    assert_eq!(seen, 300 - removed.len());
}

#[test]
fn test_filtered_pop_and_promotion() {
    let queue = TieredQueue::new();
    queue.put(WorkItem::new("bg", Priority::Background).created_at(0));
    queue.put(WorkItem::new("n1", Priority::Normal).created_at(1));
    queue.put(WorkItem::new("h1", Priority::High).created_at(5));

    assert!(queue
        .pop_from(&[Priority::Critical])
        .is_none());
    assert_eq!(queue.peek(Some(Priority::Normal)).unwrap().id, "n1");

    // Promoted items go behind everything already in the tier.
    assert!(queue.update_priority("bg", Priority::High));
    assert!(!queue.update_priority("ghost", Priority::High));
    assert_eq!(queue.tier_of("bg"), Some(Priority::High));

    let order: Vec<String> = std::iter::from_fn(|| queue.pop_from(&[Priority::High]))
        .map(|i| i.id)
        .collect();
    assert_eq!(order, ["h1", "bg"]);
    assert_eq!(queue.len_of(Priority::Normal), 1);
}

#[test]
fn test_heavy_churn_compacts_tombstones() {
    let queue = TieredQueue::new();
    for id in 0..200 {
        queue.put(WorkItem::new(format!("t{id}"), Priority::Low).created_at(id));
    }
    for id in 0..190 {
        assert!(queue.remove(&format!("t{id}")));
    }
    assert_eq!(queue.len(), 10);
    // Auto-compaction already ran, so at most a handful are left to purge.
    assert!(queue.cleanup_deleted() < 190);
    assert_eq!(queue.cleanup_deleted(), 0);
    assert_eq!(queue.pop().unwrap().id, "t190");
}
