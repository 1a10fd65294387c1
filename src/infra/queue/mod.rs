//! Queue backends.

pub mod memory;

pub use memory::{QueueStatus, TierShareOfQueue, TieredQueue};
