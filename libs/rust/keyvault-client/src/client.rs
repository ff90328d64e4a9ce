//! Key Vault secrets client authenticated by a [`TokenCredential`].

use crate::{
    config::SecretClientConfig,
    error::{KeyVaultError, KeyVaultResult},
    provider::{SecretProvider, TokenCredential},
    secrets::{KeyVaultErrorResponse, KeyVaultSecret, SecretBundle},
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::AUTHORIZATION};
use rust_common::build_http_client;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Key Vault client. Every request carries a freshly validated bearer
/// token from the credential.
pub struct SecretClient {
    config: SecretClientConfig,
    http: Client,
    credential: Arc<dyn TokenCredential>,
}

impl SecretClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::InvalidConfig`] for a bad vault URL or if
    /// the HTTP client cannot be built.
    pub fn new(config: SecretClientConfig, credential: Arc<dyn TokenCredential>) -> KeyVaultResult<Self> {
        config.validate()?;
        let http = build_http_client(&config.http)?;
        Ok(Self {
            config,
            http,
            credential,
        })
    }

    /// Vault this client talks to.
    #[must_use]
    pub fn vault_url(&self) -> &str {
        &self.config.vault_url
    }

    fn secret_url(&self, name: &str, version: Option<&str>) -> String {
        let base = self.config.vault_url.trim_end_matches('/');
        match version {
            Some(v) => format!("{base}/secrets/{name}/{v}"),
            None => format!("{base}/secrets/{name}"),
        }
    }
}

#[async_trait]
impl SecretProvider for SecretClient {
    #[instrument(skip(self), fields(vault = %self.config.vault_url))]
    async fn get_secret(&self, name: &str, version: Option<&str>) -> KeyVaultResult<KeyVaultSecret> {
        validate_secret_name(name)?;
        if let Some(v) = version {
            validate_version(v)?;
        }

        let token = self.credential.get_token(&[self.config.scope.as_str()]).await?;

        debug!("Getting secret");
        let response = self
            .http
            .get(self.secret_url(name, version))
            .query(&[("api-version", self.config.api_version.as_str())])
            .header(AUTHORIZATION, token.bearer_header())
            .send()
            .await
            .map_err(|e| KeyVaultError::unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let bundle: SecretBundle = response.json().await?;
            return Ok(bundle.into());
        }

        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<KeyVaultErrorResponse>(&text)
            .map(|e| e.detail())
            .unwrap_or_else(|_| format!("Status {status}"));

        match status {
            StatusCode::NOT_FOUND => Err(KeyVaultError::not_found(name)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(status = status.as_u16(), %detail, "Key Vault denied access");
                Err(KeyVaultError::PermissionDenied(detail))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(KeyVaultError::RateLimited),
            _ => Err(KeyVaultError::unavailable(format!("Status {status}: {detail}"))),
        }
    }
}

/// Key Vault object names: 1-127 characters of `0-9a-zA-Z-`.
fn validate_secret_name(name: &str) -> KeyVaultResult<()> {
    let valid = (1..=127).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(KeyVaultError::config(format!("invalid secret name {name:?}")))
    }
}

fn validate_version(version: &str) -> KeyVaultResult<()> {
    if !version.is_empty() && version.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(KeyVaultError::config(format!("invalid secret version {version:?}")))
    }
}
