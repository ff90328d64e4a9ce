//! Wire types for the token endpoint and the Key Vault secrets API.

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::fmt;

/// Successful OAuth2 token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// Issued bearer token
    pub access_token: String,
    /// Token scheme, `Bearer` when present
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds. Some authorities send it as a string.
    #[serde(deserialize_with = "seconds_from_number_or_string")]
    pub expires_in: u64,
}

/// OAuth2 error body returned with a non-success status.
#[derive(Debug, Default, Deserialize)]
pub struct TokenErrorResponse {
    /// OAuth2 error code, e.g. `invalid_client`
    #[serde(default)]
    pub error: Option<String>,
    /// Provider description; the first line is the useful part
    #[serde(default)]
    pub error_description: Option<String>,
    /// Provider-specific numeric codes
    #[serde(default)]
    pub error_codes: Vec<u64>,
    /// Provider correlation ID for support requests
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl TokenErrorResponse {
    /// Human-readable detail, falling back to the raw body.
    #[must_use]
    pub fn detail(&self, raw_body: &str) -> String {
        match (&self.error, &self.error_description) {
            (Some(code), Some(desc)) => format!("{code}: {}", first_line(desc)),
            (Some(code), None) => code.clone(),
            (None, Some(desc)) => first_line(desc).to_string(),
            (None, None) if raw_body.trim().is_empty() => "empty response body".to_string(),
            (None, None) => raw_body.trim().chars().take(256).collect(),
        }
    }
}

/// Provider descriptions carry trace and timestamp lines after the first.
fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s).trim()
}

fn seconds_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Key Vault secret bundle (`GET /secrets/{name}/{version}`).
#[derive(Debug, Deserialize)]
pub struct SecretBundle {
    /// Secret value
    pub value: String,
    /// Full secret identifier, including the version
    pub id: String,
    /// Optional content type hint
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
    /// Secret attributes
    #[serde(default)]
    pub attributes: SecretAttributes,
}

/// Secret attributes. Timestamps are Unix seconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretAttributes {
    /// Whether the secret can be read
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Creation time
    #[serde(default)]
    pub created: Option<i64>,
    /// Last update time
    #[serde(default)]
    pub updated: Option<i64>,
    /// Expiry time
    #[serde(default)]
    pub exp: Option<i64>,
    /// Not-before time
    #[serde(default)]
    pub nbf: Option<i64>,
}

/// Key Vault error envelope.
#[derive(Debug, Default, Deserialize)]
pub struct KeyVaultErrorResponse {
    /// Error details
    #[serde(default)]
    pub error: KeyVaultErrorBody,
}

/// Code and message inside a [`KeyVaultErrorResponse`].
#[derive(Debug, Default, Deserialize)]
pub struct KeyVaultErrorBody {
    /// Error code, e.g. `Forbidden`
    #[serde(default)]
    pub code: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl KeyVaultErrorResponse {
    /// `code: message`, or whichever of the two is present.
    #[must_use]
    pub fn detail(&self) -> String {
        match (&self.error.code, &self.error.message) {
            (Some(code), Some(msg)) => format!("{code}: {msg}"),
            (Some(code), None) => code.clone(),
            (None, Some(msg)) => msg.clone(),
            (None, None) => "no error detail".to_string(),
        }
    }
}

/// Secret retrieved from Key Vault.
#[derive(Clone)]
pub struct KeyVaultSecret {
    /// Full secret identifier, including the version
    pub id: String,
    /// Secret value
    pub value: SecretString,
    /// Optional content type hint
    pub content_type: Option<String>,
    /// Secret attributes
    pub attributes: SecretAttributes,
}

impl KeyVaultSecret {
    /// Version segment of the identifier, if present.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        let path = self.id.trim_end_matches('/');
        let (rest, last) = path.rsplit_once('/')?;
        let (rest, _name) = rest.rsplit_once('/')?;
        rest.ends_with("/secrets").then_some(last)
    }
}

impl From<SecretBundle> for KeyVaultSecret {
    fn from(bundle: SecretBundle) -> Self {
        Self {
            id: bundle.id,
            value: SecretString::from(bundle.value),
            content_type: bundle.content_type,
            attributes: bundle.attributes,
        }
    }
}

impl fmt::Debug for KeyVaultSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVaultSecret")
            .field("id", &self.id)
            .field("value", &"[REDACTED]")
            .field("content_type", &self.content_type)
            .field("attributes", &self.attributes)
            .finish()
    }
}
