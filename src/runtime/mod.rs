//! Runtime adapters for async hosts.

pub mod tokio_driver;

pub use tokio_driver::{TokioDriver, TokioExecutionHook};
