//! Capability traits at the seams between credential, client and poller.

use crate::error::KeyVaultResult;
use crate::secrets::KeyVaultSecret;
use crate::token::AccessToken;
use async_trait::async_trait;

/// Supplies bearer tokens for outbound requests.
///
/// Callers must treat any error as "not currently authenticated" and must
/// not send the request without a valid token.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Get a token valid for all of `scopes`.
    async fn get_token(&self, scopes: &[&str]) -> KeyVaultResult<AccessToken>;
}

/// Retrieves secrets by name.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Get the latest version of a secret, or a specific `version`.
    async fn get_secret(&self, name: &str, version: Option<&str>) -> KeyVaultResult<KeyVaultSecret>;
}
