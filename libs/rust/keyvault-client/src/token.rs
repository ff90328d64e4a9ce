//! Access tokens and the scope-set cache key.

use crate::error::{KeyVaultError, KeyVaultResult};
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Canonical, order-independent form of a requested scope set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(BTreeSet<String>);

impl ScopeKey {
    /// Build a key from requested scopes. Whitespace is trimmed and
    /// duplicates collapse.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::InvalidConfig`] when no non-blank scope is
    /// given or a scope contains inner whitespace.
    pub fn new<I, S>(scopes: I) -> KeyVaultResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for scope in scopes {
            let scope = scope.as_ref().trim();
            if scope.is_empty() {
                continue;
            }
            if scope.contains(char::is_whitespace) {
                return Err(KeyVaultError::config(format!(
                    "scope {scope:?} must not contain whitespace"
                )));
            }
            set.insert(scope.to_string());
        }
        if set.is_empty() {
            return Err(KeyVaultError::config("at least one scope is required"));
        }
        Ok(Self(set))
    }

    /// Space-delimited form sent as the OAuth2 `scope` parameter.
    #[must_use]
    pub fn to_scope_param(&self) -> String {
        self.0.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }

    /// Iterate over the scopes in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_scope_param())
    }
}

/// Short-lived bearer token returned by the identity provider.
#[derive(Clone)]
pub struct AccessToken {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Wrap a token value with its absolute expiry.
    #[must_use]
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at,
        }
    }

    /// Build from a lifetime relative to `issued_at`.
    #[must_use]
    pub fn from_lifetime(value: impl Into<String>, issued_at: DateTime<Utc>, lifetime: Duration) -> Self {
        let lifetime = TimeDelta::from_std(lifetime).unwrap_or(TimeDelta::MAX);
        let expires_at = issued_at
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(value, expires_at)
    }

    /// Raw token value.
    #[must_use]
    pub fn secret(&self) -> &str {
        self.value.expose_secret()
    }

    /// Absolute expiry.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True while `now + margin` is strictly before expiry.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = TimeDelta::from_std(margin).unwrap_or(TimeDelta::MAX);
        now.checked_add_signed(margin)
            .is_some_and(|deadline| deadline < self.expires_at)
    }

    /// [`is_fresh_at`](Self::is_fresh_at) against the current time.
    #[must_use]
    pub fn is_fresh(&self, margin: Duration) -> bool {
        self.is_fresh_at(Utc::now(), margin)
    }

    /// Remaining lifetime, zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// `Authorization` header value.
    #[must_use]
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.secret())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
