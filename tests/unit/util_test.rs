//! Tests for utility types

use std::time::Duration;

use prometheus_tier_scheduler::util::{
    init_tracing, tier_label, Clock, ManualClock, Priority, ResourceAllocation, ResourceKind,
    SystemClock,
};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical < Priority::High);
    assert!(Priority::High < Priority::Normal);
    assert!(Priority::Low < Priority::Background);
    assert_eq!(Priority::Background.value(), 5);
    assert_eq!(Priority::from_value(2), Some(Priority::High));
    assert_eq!(Priority::from_value(0), None);
    assert!(Priority::High.is_preemptive());
    assert!(!Priority::Normal.is_preemptive());
}

#[test]
fn test_priority_serde_names() {
    assert_eq!(serde_json::to_string(&Priority::Background).unwrap(), "\"background\"");
    let parsed: Priority = serde_json::from_str("\"critical\"").unwrap();
    assert_eq!(parsed, Priority::Critical);
    assert_eq!(Priority::Normal.to_string(), "normal");
}

#[test]
fn test_tier_labels_are_separate_from_ordering() {
    assert_eq!(tier_label(Priority::Critical).name, "Critical");
    assert_eq!(tier_label(Priority::Critical).color, "red");
    assert_eq!(tier_label(Priority::Background).color, "gray");
    let names: Vec<&str> = Priority::ALL.iter().map(|&p| tier_label(p).name).collect();
    assert_eq!(names, ["Critical", "High", "Normal", "Low", "Background"]);
}

#[test]
fn test_resource_allocation_arithmetic() {
    let mut a = ResourceAllocation::ZERO;
    a.set(ResourceKind::Bandwidth, 512);
    a.set(ResourceKind::Concurrency, 1);
    let b = ResourceAllocation::from_fn(|_| 1);

    let sum = a.saturating_add(&b);
    assert_eq!(sum.get(ResourceKind::Bandwidth), 513);
    assert_eq!(sum.get(ResourceKind::Memory), 1);

    let clamped = b.saturating_sub(&sum);
    assert!(clamped.is_zero());

    assert!(a.fits_within(&sum));
    assert!(!sum.fits_within(&a));
}

#[test]
fn test_manual_clock() {
    let clock = ManualClock::new(10);
    assert_eq!(clock.now_ms(), 10);
    clock.advance(Duration::from_secs(2));
    assert_eq!(clock.now_ms(), 2010);
    clock.set(5);
    assert_eq!(clock.now_ms(), 5);
    assert!(SystemClock.now_ms() > 0);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialized twice without panicking");
}
