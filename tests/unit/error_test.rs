//! Tests for error types

use prometheus_tier_scheduler::core::SchedulerError;
use prometheus_tier_scheduler::util::Priority;

#[test]
fn test_error_display() {
    let err = SchedulerError::ResourceExhausted {
        tier: Priority::Critical,
    };
    assert_eq!(err.to_string(), "resources exhausted for tier critical");

    let err = SchedulerError::PreemptionRateLimited { limit: 5 };
    assert_eq!(err.to_string(), "preemption rate limit reached (5 per minute)");

    let err = SchedulerError::UnknownReference("t-1".into());
    assert_eq!(err.to_string(), "unknown task: t-1");
}

#[test]
fn test_only_corrupted_state_is_fatal() {
    assert!(SchedulerError::CorruptedState("orphan".into()).is_fatal());
    assert!(!SchedulerError::TickFault("panic".into()).is_fatal());
    assert!(!SchedulerError::ResourceExhausted { tier: Priority::Low }.is_fatal());
    assert!(!SchedulerError::AlreadyRunning.is_fatal());
}

#[test]
fn test_error_converts_into_anyhow() {
    let err: anyhow::Error = SchedulerError::InvalidConfig("bad".into()).into();
    assert_eq!(err.to_string(), "invalid configuration: bad");
    assert!(err.downcast_ref::<SchedulerError>().is_some());
}
