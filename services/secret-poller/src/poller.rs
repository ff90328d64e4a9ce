//! Periodic secret fetch loop.

use crate::shutdown::ShutdownSignal;
use keyvault_client::{KeyVaultError, KeyVaultResult, KeyVaultSecret, SecretProvider};
use rust_common::{Retryable, RetryConfig, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// What to poll and how often.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Secret to fetch
    pub secret_name: String,
    /// Pinned version; latest when unset
    pub secret_version: Option<String>,
    /// Delay between polls while fetches succeed
    pub poll_interval: Duration,
    /// Upper bound on the delay after consecutive failures
    pub max_backoff: Duration,
}

impl PollerConfig {
    /// Poll `secret_name` every 60 seconds, backing off to at most 300.
    #[must_use]
    pub fn new(secret_name: impl Into<String>) -> Self {
        Self {
            secret_name: secret_name.into(),
            secret_version: None,
            poll_interval: Duration::from_secs(60),
            max_backoff: Duration::from_secs(300),
        }
    }

    /// Pin a secret version.
    #[must_use]
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.secret_version = version;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the backoff cap.
    #[must_use]
    pub const fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::InvalidConfig`] for a blank secret name or a
    /// zero interval or backoff cap.
    pub fn validate(&self) -> KeyVaultResult<()> {
        if self.secret_name.trim().is_empty() {
            return Err(KeyVaultError::config("secret name must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(KeyVaultError::config("poll interval must be positive"));
        }
        if self.max_backoff.is_zero() {
            return Err(KeyVaultError::config("max backoff must be positive"));
        }
        Ok(())
    }
}

/// Outcome counts of a finished [`SecretPoller::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    /// Polls that returned the secret
    pub successes: u64,
    /// Polls that failed
    pub failures: u64,
}

/// Fetches one secret on a fixed cadence until shut down.
///
/// Failures never stop the loop. Each consecutive failure stretches the
/// next delay exponentially, with jitter, up to `max_backoff`; the first
/// success restores the normal interval.
pub struct SecretPoller {
    provider: Arc<dyn SecretProvider>,
    config: PollerConfig,
    backoff: RetryPolicy,
}

impl SecretPoller {
    /// Create a poller over `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn SecretProvider>, config: PollerConfig) -> Self {
        let backoff = RetryPolicy::new(
            RetryConfig::default()
                .with_initial_delay(config.poll_interval.min(config.max_backoff))
                .with_max_delay(config.max_backoff),
        );
        Self {
            provider,
            config,
            backoff,
        }
    }

    /// Fetch the secret once.
    ///
    /// # Errors
    ///
    /// Whatever the provider returns.
    #[instrument(skip(self), fields(secret = %self.config.secret_name))]
    pub async fn poll_once(&self) -> KeyVaultResult<KeyVaultSecret> {
        self.provider
            .get_secret(&self.config.secret_name, self.config.secret_version.as_deref())
            .await
    }

    /// Delay before the next poll after `consecutive_failures` failures in a
    /// row.
    #[must_use]
    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        match consecutive_failures {
            0 => self.config.poll_interval,
            n => self.backoff.delay_for_attempt(n - 1),
        }
    }

    /// Poll until `shutdown` fires. An in-flight fetch is abandoned on
    /// shutdown.
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> PollStats {
        let mut stats = PollStats::default();
        let mut consecutive_failures: u32 = 0;

        info!(
            secret = %self.config.secret_name,
            interval_secs = self.config.poll_interval.as_secs(),
            max_backoff_secs = self.config.max_backoff.as_secs(),
            "Secret poller started"
        );

        while !shutdown.is_shutdown() {
            let outcome = tokio::select! {
                biased;
                () = shutdown.recv() => break,
                outcome = self.poll_once() => outcome,
            };

            match outcome {
                Ok(secret) => {
                    stats.successes += 1;
                    consecutive_failures = 0;
                    info!(
                        secret = %self.config.secret_name,
                        version = secret.version().unwrap_or("unknown"),
                        "successfully got secret"
                    );
                }
                Err(e) => {
                    stats.failures += 1;
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if e.is_retryable() {
                        warn!(error = %e, consecutive_failures, "failed to get secret");
                    } else {
                        error!(error = %e, consecutive_failures, "failed to get secret");
                    }
                }
            }

            let delay = self.next_delay(consecutive_failures);
            debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "Waiting for next poll");
            tokio::select! {
                biased;
                () = shutdown.recv() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!(
            successes = stats.successes,
            failures = stats.failures,
            "Secret poller stopped"
        );
        stats
    }
}
