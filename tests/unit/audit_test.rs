//! Tests for the audit trail

use prometheus_tier_scheduler::core::{
    build_audit_event, AuditAction, AuditSink, InMemoryAuditSink,
};
use prometheus_tier_scheduler::util::Priority;

#[test]
fn test_in_memory_sink_keeps_newest_events() {
    let mut sink = InMemoryAuditSink::new(2);
    sink.record(build_audit_event("a", Priority::Normal, AuditAction::Submit, None));
    sink.record(build_audit_event("a", Priority::Normal, AuditAction::Admit, None));
    sink.record(build_audit_event(
        "a",
        Priority::Normal,
        AuditAction::Complete,
        Some("done".into()),
    ));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, AuditAction::Admit);
    assert_eq!(events[1].detail.as_deref(), Some("done"));
    assert_eq!(sink.actions_for("a"), [AuditAction::Admit, AuditAction::Complete]);
    assert!(sink.actions_for("b").is_empty());
}

#[test]
fn test_zero_capacity_sink_drops_everything() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event("a", Priority::Low, AuditAction::Deny, None));
    assert!(sink.events().is_empty());
}

#[test]
fn test_event_ids_are_unique_and_restampable() {
    let first = build_audit_event("a", Priority::High, AuditAction::Promote, None);
    let second = build_audit_event("a", Priority::High, AuditAction::Promote, None);
    assert_ne!(first.event_id, second.event_id);
    assert_eq!(first.at(42).created_at_ms, 42);
    assert_eq!(AuditAction::Preempt.to_string(), "preempt");
}
