//! Infrastructure adapters: storage for pending work.

pub mod queue;
pub use queue::{QueueStatus, TieredQueue};
