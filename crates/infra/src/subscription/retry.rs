//! Retry strategies for subscriptions in `ERROR`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use contentrepo_events::Subscription;

/// Decides whether a failed subscription is set back to its previous status.
///
/// Only consulted for failures that happened in a retryable status
/// (`NEW`, `BOOTING`, `ACTIVE`).
pub trait RetryStrategy: Send + Sync {
    fn should_retry(&self, subscription: &Subscription) -> bool;
}

/// Failed subscriptions stay failed until an operator intervenes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetryStrategy;

impl RetryStrategy for NoRetryStrategy {
    fn should_retry(&self, _subscription: &Subscription) -> bool {
        false
    }
}

/// Retry immediately until `max_attempts` retries were made.
#[derive(Debug, Clone, Copy)]
pub struct MaxAttemptsRetryStrategy {
    pub max_attempts: u32,
}

impl MaxAttemptsRetryStrategy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl RetryStrategy for MaxAttemptsRetryStrategy {
    fn should_retry(&self, subscription: &Subscription) -> bool {
        subscription.retry_attempt < self.max_attempts
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn linear(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Linear,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2_u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
        };
        delay.min(self.max_delay)
    }

    /// Check if more retries are allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Retry within an attempt budget, waiting a growing delay after each failure.
///
/// The delay is measured from the subscription's `last_saved_at`, i.e. from
/// when the failure was recorded.
#[derive(Debug, Clone, Default)]
pub struct BackoffRetryStrategy {
    policy: RetryPolicy,
}

impl BackoffRetryStrategy {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn should_retry_at(&self, subscription: &Subscription, now: DateTime<Utc>) -> bool {
        if !self.policy.should_retry(subscription.retry_attempt) {
            return false;
        }
        let Some(failed_at) = subscription.last_saved_at else {
            return true;
        };
        let delay = self.policy.delay_for_attempt(subscription.retry_attempt + 1);
        match (now - failed_at).to_std() {
            Ok(elapsed) => elapsed >= delay,
            // Clock went backwards; wait until it catches up.
            Err(_) => false,
        }
    }
}

impl RetryStrategy for BackoffRetryStrategy {
    fn should_retry(&self, subscription: &Subscription) -> bool {
        self.should_retry_at(subscription, Utc::now())
    }
}

impl<R> RetryStrategy for std::sync::Arc<R>
where
    R: RetryStrategy + ?Sized,
{
    fn should_retry(&self, subscription: &Subscription) -> bool {
        (**self).should_retry(subscription)
    }
}
