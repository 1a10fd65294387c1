//! Display metadata for tiers.
//!
//! Lives outside the scheduling core so ordering logic never depends on it;
//! UI layers map a [`Priority`] to a label here.

use serde::Serialize;

use super::serde::Priority;

/// Human-facing label and color for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierLabel {
    /// Display name.
    pub name: &'static str,
    /// Suggested UI color.
    pub color: &'static str,
}

/// Look up the display label for a tier.
#[must_use]
pub const fn tier_label(priority: Priority) -> TierLabel {
    let (name, color) = match priority {
        Priority::Critical => ("Critical", "red"),
        Priority::High => ("High", "orange"),
        Priority::Normal => ("Normal", "blue"),
        Priority::Low => ("Low", "green"),
        Priority::Background => ("Background", "gray"),
    };
    TierLabel { name, color }
}
