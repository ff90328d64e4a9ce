//! Key Vault and credential error types using thiserror 2.0.
//!
//! The error is `Clone` so that one refresh outcome can be handed to every
//! caller waiting on the same in-flight token exchange. Underlying
//! `reqwest`/`serde_json` errors are therefore flattened to messages.

use rust_common::{PlatformError, Retryable};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the federated credential and the secret client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyVaultError {
    /// Required configuration missing or malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Assertion token file missing, unreadable or empty
    #[error("Assertion token unavailable at {}: {reason}", path.display())]
    AssertionUnavailable {
        /// Configured token file path
        path: PathBuf,
        /// Underlying read failure
        reason: String,
    },

    /// Identity provider rejected the token exchange
    #[error("Token exchange rejected (HTTP {status}): {detail}")]
    ExchangeRejected {
        /// HTTP status returned by the token endpoint
        status: u16,
        /// Provider error code and description
        detail: String,
    },

    /// Transport failure talking to the identity provider or Key Vault
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Exchange did not complete within the configured bound
    #[error("Token exchange timed out after {0:?}")]
    Timeout(Duration),

    /// Response body could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Secret does not exist
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    /// Caller identity is not allowed to read the secret
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Key Vault throttled the request
    #[error("Rate limited")]
    RateLimited,
}

/// Result type for Key Vault operations.
pub type KeyVaultResult<T> = Result<T, KeyVaultError>;

impl KeyVaultError {
    /// Whether this failure means "not currently authenticated".
    ///
    /// Everything raised while obtaining a token counts, including a
    /// failed assertion read.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::AssertionUnavailable { .. }
                | Self::ExchangeRejected { .. }
                | Self::Unavailable(_)
                | Self::Timeout(_)
                | Self::InvalidResponse(_)
        )
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an invalid response error.
    #[must_use]
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create a secret not found error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::SecretNotFound(name.into())
    }
}

impl Retryable for KeyVaultError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AssertionUnavailable { .. }
                | Self::Unavailable(_)
                | Self::Timeout(_)
                | Self::RateLimited
        )
    }
}

impl From<reqwest::Error> for KeyVaultError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for KeyVaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

impl From<PlatformError> for KeyVaultError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Unavailable(msg) => Self::Unavailable(msg),
            PlatformError::InvalidInput(msg) => Self::InvalidConfig(msg),
            other => Self::InvalidConfig(other.to_string()),
        }
    }
}
