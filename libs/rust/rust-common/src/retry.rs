//! Exponential backoff with jitter.
//!
//! Supplies the delay schedule for periodic work that keeps failing. The
//! caller owns the loop and decides whether to try again.

use std::time::Duration;

/// Backoff schedule configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any computed delay, jitter included
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Set the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Disable jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

/// Backoff schedule computed from a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a retry policy with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Delay before attempt number `attempt + 1`.
    ///
    /// Grows as `initial_delay * multiplier^attempt`, adds up to 25% jitter
    /// when enabled, and never exceeds `max_delay`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let max_ms = self.config.max_delay.as_millis() as f64;
        let base_ms = (self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(exponent))
        .min(max_ms);

        let delay_ms = if self.config.jitter {
            let jitter_factor = 1.0 + (rand::random::<f64>() * 0.25);
            (base_ms * jitter_factor).min(max_ms)
        } else {
            base_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}
