//! Centralized configuration for the secret poller.
//!
//! All configuration is loaded from environment variables and validated
//! at startup.

use crate::poller::PollerConfig;
use keyvault_client::config::required_var;
use keyvault_client::{CredentialConfig, KeyVaultError, KeyVaultResult, SecretClientConfig};
use std::time::Duration;

/// Secret poller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Vault to read from
    pub secret_client: SecretClientConfig,
    /// Federated workload identity
    pub credential: CredentialConfig,
    /// What to fetch and how often
    pub poller: PollerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> KeyVaultResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::InvalidConfig`] for the first missing or
    /// malformed variable.
    pub fn from_lookup<F>(lookup: F) -> KeyVaultResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret_client = SecretClientConfig::new(required_var(&lookup, "KEYVAULT_URL")?);
        secret_client.validate()?;

        let credential = CredentialConfig::from_lookup(&lookup)?;

        let secret_name = required_var(&lookup, "SECRET_NAME")?;
        let secret_version = lookup("SECRET_VERSION")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let poll_interval = Duration::from_secs(parse_var(&lookup, "POLL_INTERVAL_SECS", 60)?);
        let max_backoff = Duration::from_secs(parse_var(&lookup, "MAX_BACKOFF_SECS", 300)?);

        let poller = PollerConfig::new(secret_name)
            .with_version(secret_version)
            .with_poll_interval(poll_interval)
            .with_max_backoff(max_backoff);
        poller.validate()?;

        Ok(Self {
            secret_client,
            credential,
            poller,
        })
    }
}

/// Parse a variable with a default value.
fn parse_var<F, T>(lookup: F, name: &str, default: T) -> KeyVaultResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|e| KeyVaultError::config(format!("Invalid {name}: {e}"))),
        None => Ok(default),
    }
}
