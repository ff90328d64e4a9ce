//! Credential and secret client configuration.

use crate::error::{KeyVaultError, KeyVaultResult};
use rust_common::HttpConfig;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Scope requested for Key Vault data-plane access.
pub const KEYVAULT_SCOPE: &str = "https://vault.azure.net/.default";

/// Key Vault REST API version.
pub const KEYVAULT_API_VERSION: &str = "7.4";

/// Federated credential configuration.
///
/// Resolved once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    /// Directory (tenant) ID
    pub tenant_id: String,
    /// Application (client) ID of the federated identity
    pub client_id: String,
    /// Identity provider base URL, e.g. `https://login.microsoftonline.com/`
    pub authority_host: String,
    /// Mounted, externally rotated assertion token
    pub token_file_path: PathBuf,
    /// Refresh when less than this much lifetime remains
    pub safety_margin: Duration,
    /// Bound on one refresh (assertion read plus exchange)
    pub exchange_timeout: Duration,
    /// Transport settings for the token endpoint
    pub http: HttpConfig,
}

impl CredentialConfig {
    /// Create a configuration with default margin and timeout.
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        authority_host: impl Into<String>,
        token_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            authority_host: authority_host.into(),
            token_file_path: token_file_path.into(),
            safety_margin: Duration::from_secs(300),
            exchange_timeout: Duration::from_secs(30),
            http: HttpConfig::default(),
        }
    }

    /// Load from the variables injected by the workload identity webhook:
    /// `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_AUTHORITY_HOST` and
    /// `AZURE_FEDERATED_TOKEN_FILE`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::InvalidConfig`] naming the first missing
    /// variable, or any validation failure.
    pub fn from_env() -> KeyVaultResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env), resolving variables through
    /// `lookup` instead of the process environment.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> KeyVaultResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::new(
            required_var(&lookup, "AZURE_TENANT_ID")?,
            required_var(&lookup, "AZURE_CLIENT_ID")?,
            required_var(&lookup, "AZURE_AUTHORITY_HOST")?,
            required_var(&lookup, "AZURE_FEDERATED_TOKEN_FILE")?,
        );
        config.validate()?;
        Ok(config)
    }

    /// Set the refresh safety margin.
    #[must_use]
    pub const fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Set the exchange timeout. Also caps the HTTP request timeout.
    #[must_use]
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self.http = self.http.with_timeout(timeout);
        self
    }

    /// Replace the transport settings.
    #[must_use]
    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Check every required value is present and well formed.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::InvalidConfig`] on the first problem found.
    pub fn validate(&self) -> KeyVaultResult<()> {
        non_empty("tenant_id", &self.tenant_id)?;
        non_empty("client_id", &self.client_id)?;
        non_empty("authority_host", &self.authority_host)?;
        if self.token_file_path.as_os_str().is_empty() {
            return Err(KeyVaultError::config("token_file_path must not be empty"));
        }
        if self.tenant_id.contains('/') {
            return Err(KeyVaultError::config("tenant_id must not contain '/'"));
        }
        if self.exchange_timeout.is_zero() {
            return Err(KeyVaultError::config("exchange_timeout must be positive"));
        }
        parse_base_url("authority_host", &self.authority_host)?;
        Ok(())
    }

    /// Tenant authority, `{authority_host}/{tenant_id}`.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}/{}", self.authority_host.trim_end_matches('/'), self.tenant_id)
    }

    /// OAuth2 v2.0 token endpoint under the tenant authority.
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority())
    }
}

/// Key Vault secret client configuration.
#[derive(Debug, Clone)]
pub struct SecretClientConfig {
    /// Vault base URL, e.g. `https://my-vault.vault.azure.net/`
    pub vault_url: String,
    /// Scope requested from the credential
    pub scope: String,
    /// REST API version query parameter
    pub api_version: String,
    /// Transport settings for Key Vault
    pub http: HttpConfig,
}

impl SecretClientConfig {
    /// Create a configuration for the given vault.
    #[must_use]
    pub fn new(vault_url: impl Into<String>) -> Self {
        Self {
            vault_url: vault_url.into(),
            scope: KEYVAULT_SCOPE.to_string(),
            api_version: KEYVAULT_API_VERSION.to_string(),
            http: HttpConfig::default(),
        }
    }

    /// Override the requested scope (sovereign clouds use other audiences).
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Replace the transport settings.
    #[must_use]
    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Check the vault URL and scope.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::InvalidConfig`] on the first problem found.
    pub fn validate(&self) -> KeyVaultResult<()> {
        non_empty("vault_url", &self.vault_url)?;
        non_empty("scope", &self.scope)?;
        parse_base_url("vault_url", &self.vault_url)?;
        Ok(())
    }
}

/// Fetch a required, non-blank variable through `lookup`.
///
/// # Errors
///
/// Returns [`KeyVaultError::InvalidConfig`] naming the variable when it is
/// unset or blank.
pub fn required_var<F>(lookup: F, name: &str) -> KeyVaultResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(KeyVaultError::config(format!(
            "{name} environment variable is not set"
        ))),
    }
}

fn non_empty(field: &str, value: &str) -> KeyVaultResult<()> {
    if value.trim().is_empty() {
        return Err(KeyVaultError::config(format!("{field} must not be empty")));
    }
    Ok(())
}

fn parse_base_url(field: &str, value: &str) -> KeyVaultResult<Url> {
    let url = Url::parse(value)
        .map_err(|e| KeyVaultError::config(format!("{field} is not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(KeyVaultError::config(format!(
            "{field} must be an http(s) URL, got scheme {}",
            url.scheme()
        )));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(KeyVaultError::config(format!(
            "{field} must not carry a query or fragment"
        )));
    }
    Ok(url)
}
