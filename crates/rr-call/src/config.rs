//! Handler timing and presentation settings.

use std::time::Duration;

use chrono::{FixedOffset, Offset};
use rr_core::ReportLabels;

use crate::avatar::AvatarPolicy;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub initial_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Minimum spacing between published refreshes.
    pub refresh_cooldown: Duration,
    /// Period of the background refresh loop.
    pub refresh_interval: Duration,
    /// How long an empty call waits for a rejoin before closing.
    pub close_grace: Duration,
    pub close_retry: RetryPolicy,
    /// Offset used for timeline tick labels.
    pub utc_offset: FixedOffset,
    pub avatar_policy: AvatarPolicy,
    pub labels: ReportLabels,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            refresh_cooldown: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(60),
            close_grace: Duration::from_secs(60),
            close_retry: RetryPolicy::default(),
            utc_offset: chrono::Utc.fix(),
            avatar_policy: AvatarPolicy::Optional,
            labels: ReportLabels::default(),
        }
    }
}
