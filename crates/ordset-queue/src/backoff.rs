//! ---
//! ordset_section: "04-work-dispatch"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Per-item exponential backoff curve."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::time::Duration;

use ordset_common::QueueConfig;

/// Exponential delay `base * 2^failures`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Curve starting at `base` and never exceeding `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay before retry number `failures` (zero based).
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map(|d| d.min(self.max))
            .unwrap_or(self.max)
    }
}

impl From<&QueueConfig> for Backoff {
    fn from(config: &QueueConfig) -> Self {
        Backoff::new(config.base_delay, config.max_delay)
    }
}
