//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Attempt budgets and backoff schedules for HTTP probing."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::time::Duration;

use fdo_env_common::config::{BackoffKind, ProbeConfig};

/// Delay applied between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles after every attempt, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

/// Fixed attempt count plus backoff. Only probing retries; everything else runs once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// `attempts` is clamped to at least one.
    pub fn new(attempts: u32, backoff: Backoff) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self::new(attempts, Backoff::Fixed(delay))
    }

    pub fn exponential(attempts: u32, initial: Duration, max: Duration) -> Self {
        Self::new(attempts, Backoff::Exponential { initial, max })
    }

    /// A single attempt, no sleeping.
    pub fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        let backoff = match config.backoff {
            BackoffKind::Fixed => Backoff::Fixed(config.initial_backoff),
            BackoffKind::Exponential => Backoff::Exponential {
                initial: config.initial_backoff,
                max: config.max_backoff,
            },
        };
        Self::new(config.attempts, backoff)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Sleep following the 1-indexed `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let exponent = attempt.saturating_sub(1).min(16);
                initial.saturating_mul(1u32 << exponent).min(max)
            }
        }
    }

    /// Every sleep the policy performs, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.attempts).map(|attempt| self.delay_after(attempt)).collect()
    }
}
