//! Azure Key Vault client with federated workload-identity authentication.
//!
//! The credential reads a mounted, externally rotated assertion token,
//! exchanges it for an access token, and caches that token per scope set.
//! The secret client attaches a validated token to every request.

pub mod assertion;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod provider;
pub mod secrets;
pub mod token;

pub use assertion::{AssertionToken, TokenFileReader};
pub use client::SecretClient;
pub use config::{CredentialConfig, KEYVAULT_SCOPE, SecretClientConfig};
pub use credential::{CredentialMetrics, FederatedCredential};
pub use error::{KeyVaultError, KeyVaultResult};
pub use provider::{SecretProvider, TokenCredential};
pub use secrets::KeyVaultSecret;
pub use token::{AccessToken, ScopeKey};
