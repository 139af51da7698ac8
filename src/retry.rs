//! Retry decisions and exponential backoff for API requests.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::ApiError;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base delay doubled on each attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
/// Default upper bound of the random delay added to each backoff.
pub const DEFAULT_JITTER: Duration = Duration::from_millis(100);

/// Tunables for [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Delay before the first retry, doubled for every later attempt.
    pub base_delay: Duration,
    /// Upper bound of the uniformly random delay added on top of the backoff.
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            jitter: DEFAULT_JITTER,
        }
    }
}

/// Source of the random part of a backoff delay.
pub trait JitterSource: Send + Sync {
    /// Returns a value in `0..=max_ms`.
    fn sample(&self, max_ms: u64) -> u64;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self, max_ms: u64) -> u64 {
        if max_ms == 0 {
            return 0;
        }
        rand::rng().random_range(0..=max_ms)
    }
}

/// Always returns the same jitter, clamped to the allowed range.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub u64);

impl JitterSource for FixedJitter {
    fn sample(&self, max_ms: u64) -> u64 {
        self.0.min(max_ms)
    }
}

/// What happened on the attempt being judged.
#[derive(Debug, Clone, Copy)]
pub enum AttemptOutcome<'a> {
    /// The call failed before any response arrived.
    Failed(&'a ApiError),
    /// The server answered with a non-success status.
    Status(u16),
}

/// Result of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    /// Wait before the next attempt; zero when no retry follows.
    pub delay: Duration,
}

impl RetryDecision {
    const STOP: Self = Self {
        should_retry: false,
        delay: Duration::ZERO,
    };
}

/// Decides whether a failed attempt is retried and how long to wait first.
///
/// Network failures and `429`/`5xx` responses are retried until `max_retries` is reached.
/// The delay for attempt `n` (0-indexed) is `base_delay * 2^n` plus a jitter in
/// `0..=jitter`. No state is carried between calls.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    jitter_source: Arc<dyn JitterSource>,
}

impl RetryPolicy {
    /// Builds a policy using [`RandomJitter`].
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            jitter_source: Arc::new(RandomJitter),
        }
    }

    /// Replaces the jitter source, typically with [`FixedJitter`] in tests.
    pub fn with_jitter_source(mut self, source: Arc<dyn JitterSource>) -> Self {
        self.jitter_source = source;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Judges attempt number `attempt` (0-indexed).
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::time::Duration;
    /// use cerebras_client::retry::{AttemptOutcome, FixedJitter, RetryConfig, RetryPolicy};
    ///
    /// let policy = RetryPolicy::new(RetryConfig::default())
    ///     .with_jitter_source(Arc::new(FixedJitter(0)));
    ///
    /// let decision = policy.decide(1, AttemptOutcome::Status(503));
    /// assert!(decision.should_retry);
    /// assert_eq!(decision.delay, Duration::from_millis(200));
    ///
    /// assert!(!policy.decide(0, AttemptOutcome::Status(404)).should_retry);
    /// assert!(!policy.decide(3, AttemptOutcome::Status(503)).should_retry);
    /// ```
    pub fn decide(&self, attempt: u32, outcome: AttemptOutcome<'_>) -> RetryDecision {
        if attempt >= self.config.max_retries {
            return RetryDecision::STOP;
        }

        match outcome {
            AttemptOutcome::Failed(err) => {
                if !err.is_transport() {
                    return RetryDecision::STOP;
                }
                let delay = self.backoff(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = self.config.max_retries,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after network error"
                );
                RetryDecision {
                    should_retry: true,
                    delay,
                }
            }
            AttemptOutcome::Status(status) => {
                if !is_retryable_status(status) {
                    return RetryDecision::STOP;
                }
                let delay = self.backoff(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = self.config.max_retries,
                    status,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after HTTP error"
                );
                RetryDecision {
                    should_retry: true,
                    delay,
                }
            }
        }
    }

    /// Backoff for attempt `attempt`: `base_delay * 2^attempt + jitter`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = duration_millis(self.config.base_delay);
        let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt));
        let jitter_max = duration_millis(self.config.jitter);
        let jitter = self.jitter_source.sample(jitter_max).min(jitter_max);
        Duration::from_millis(exponential.saturating_add(jitter))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// `429` and every `5xx` status are worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
