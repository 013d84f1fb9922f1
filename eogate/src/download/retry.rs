//! Retry policy for interrupted byte transfers.
//!
//! Only idempotent steps are retried: reading bytes again from an offset is
//! safe, submitting an order twice is not. The order workflow therefore never
//! goes through this policy.

use std::time::Duration;

/// First backoff delay (100ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Backoff ceiling (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Attempts per transfer when nothing else is configured.
pub const DEFAULT_TRANSFER_ATTEMPTS: u32 = 4;

/// How often, and how far apart, a failed transfer is attempted again.
///
/// Attempt counts include the first attempt.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum RetryPolicy {
    /// Fail on the first error.
    #[default]
    None,

    /// Constant delay between attempts.
    Fixed { max_attempts: u32, delay: Duration },

    /// Delay grows by `multiplier` after each failure, capped at `max_delay`.
    ExponentialBackoff {
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    },
}

impl RetryPolicy {
    /// Exponential backoff from 100ms, doubling, capped at 30s.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed { max_attempts, delay }
    }

    /// Delay before retry number `attempt` (1 = first retry), or `None`
    /// once the attempts are used up.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts() {
            return None;
        }
        match self {
            Self::None => None,
            Self::Fixed { delay, .. } => Some(*delay),
            Self::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = multiplier.powi(attempt as i32 - 1);
                let millis = (initial_delay.as_millis() as f64 * factor).min(max_delay.as_millis() as f64);
                Some(Duration::from_millis(millis as u64).min(*max_delay))
            }
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } | Self::ExponentialBackoff { max_attempts, .. } => {
                (*max_attempts).max(1)
            }
        }
    }
}
