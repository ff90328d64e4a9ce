//! Centralized HTTP client configuration and building.
//!
//! Every outbound call (identity provider, Key Vault) goes through a client
//! built here so timeouts, pooling and TLS settings stay consistent.

use crate::PlatformError;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Whole-request timeout (default: 30s)
    pub timeout: Duration,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Duration,
    /// Pool idle timeout (default: 90s)
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per host (default: 4)
    pub pool_max_idle_per_host: usize,
    /// User agent string
    pub user_agent: String,
    /// Refuse plain-text `http://` URLs (default: true)
    pub https_only: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 4,
            user_agent: concat!("workload-identity-rust/", env!("CARGO_PKG_VERSION")).to_string(),
            https_only: true,
        }
    }
}

impl HttpConfig {
    /// Set the whole-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set a custom user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Allow plain-text `http://` endpoints. Only meant for local fakes.
    #[must_use]
    pub const fn allow_insecure_http(mut self) -> Self {
        self.https_only = false;
        self
    }
}

/// Build a configured HTTP client.
///
/// Creates a reqwest client with rustls TLS, connection pooling, and
/// the specified configuration.
///
/// # Errors
///
/// Returns [`PlatformError::Http`] if the client cannot be built
/// (e.g. TLS backend initialization fails).
///
/// # Examples
///
/// ```
/// use rust_common::{HttpConfig, build_http_client};
/// use std::time::Duration;
///
/// let config = HttpConfig::default().with_timeout(Duration::from_secs(10));
/// let client = build_http_client(&config).expect("client");
/// ```
pub fn build_http_client(config: &HttpConfig) -> Result<Client, PlatformError> {
    let client = ClientBuilder::new()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(config.pool_idle_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(&config.user_agent)
        .https_only(config.https_only)
        .use_rustls_tls()
        .build()?;
    Ok(client)
}
