//! # Prometheus Tier Scheduler
//!
//! A priority-tiered, resource-bounded scheduler for long-running work such as
//! transfers, downloads and batch jobs.
//!
//! Work is grouped into five tiers (CRITICAL, HIGH, NORMAL, LOW, BACKGROUND).
//! Each tier owns a percentage share of five global capacities: connections,
//! bandwidth, concurrency, disk I/O and memory. A periodic control loop admits
//! queued work when the tier's quota allows it, lets CRITICAL/HIGH work evict
//! lower-tier executions under a rate limit, and promotes starving work to
//! HIGH once.
//!
//! ## Components
//!
//! - [`infra::queue::TieredQueue`]: five FIFO-within-tier heaps with lazy deletion
//! - [`core::ResourceManager`]: per-tier quota accounting and admission gate
//! - [`core::Scheduler`]: admission, preemption, starvation control and the
//!   completion sweep, driven by [`core::Scheduler::tick`]
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_tier_scheduler::builders::SchedulerBuilder;
//! use prometheus_tier_scheduler::core::WorkItem;
//! use prometheus_tier_scheduler::util::serde::Priority;
//!
//! let scheduler = Arc::new(SchedulerBuilder::new().hook(Arc::new(MyHook)).build()?);
//! scheduler.start()?;
//! scheduler.add_task(WorkItem::new("upload-42", Priority::High));
//! ```
//!
//! With the `tokio-runtime` feature, `runtime::TokioDriver` drives the loop
//! from a tokio task and `runtime::TokioExecutionHook` runs a
//! [`core::WorkExecutor`] per admitted item.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling: work items, capacity accounting, executions and the scheduler.
pub mod core;
/// Configuration models for the scheduler and its resource budget.
pub mod config;
/// Builders to assemble a scheduler from configuration.
pub mod builders;
/// Storage for pending work.
pub mod infra;
/// Runtime adapters for async hosts.
#[cfg(feature = "tokio-runtime")]
pub mod runtime;
/// Shared utilities.
pub mod util;
