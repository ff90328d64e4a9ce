//! Centralized error types for the shared helpers.
//!
//! Errors carry a retryability classification so that callers driving
//! periodic or retried work can decide whether another attempt makes sense.

use thiserror::Error;

/// Classification shared by every error type that feeds a [`crate::RetryPolicy`].
pub trait Retryable {
    /// Whether a later attempt of the same operation may succeed.
    fn is_retryable(&self) -> bool;
}

/// Common error type for platform helpers.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// HTTP client could not be built or a request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Service is temporarily unavailable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlatformError {
    /// Create an unavailable error with the given message.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an invalid input error with the given message.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error with the given message.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl Retryable for PlatformError {
    /// Only unavailability is transient.
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_common::{PlatformError, Retryable};
    ///
    /// assert!(PlatformError::unavailable("idp down").is_retryable());
    /// assert!(!PlatformError::invalid_input("empty tenant").is_retryable());
    /// ```
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
