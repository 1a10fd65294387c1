//! Configuration models for the scheduler and its resource budget.

pub mod scheduler;

pub use scheduler::{OversizedPolicy, SchedulerConfig, SchedulerSettings, SchedulingPolicy};
