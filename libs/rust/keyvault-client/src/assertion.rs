//! Reads the federated assertion token from its mounted file.

use crate::error::{KeyVaultError, KeyVaultResult};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Signed identity token presented during the exchange.
///
/// Good for one exchange attempt only; never cached.
#[derive(Clone)]
pub struct AssertionToken(SecretString);

impl AssertionToken {
    /// Expose the raw assertion for the exchange request body.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for AssertionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AssertionToken([REDACTED])")
    }
}

/// Reader bound to one token file path.
///
/// The file is rotated out-of-band, so every [`read`](Self::read) goes back
/// to storage.
#[derive(Debug, Clone)]
pub struct TokenFileReader {
    path: PathBuf,
}

impl TokenFileReader {
    /// Bind a reader to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Configured path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current assertion.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::AssertionUnavailable`] when the file is
    /// missing, unreadable, or holds only whitespace.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn read(&self) -> KeyVaultResult<AssertionToken> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(self.unavailable("file is empty"));
        }

        debug!(len = trimmed.len(), "Read assertion token");
        Ok(AssertionToken(SecretString::from(trimmed.to_string())))
    }

    fn unavailable(&self, reason: impl Into<String>) -> KeyVaultError {
        KeyVaultError::AssertionUnavailable {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_token_file(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("assertion-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_read_trims_whitespace() {
        let path = temp_token_file("  eyJhbGciOiJSUzI1NiJ9.payload.sig\n");
        let token = TokenFileReader::new(&path).read().await.unwrap();
        assert_eq!(token.expose(), "eyJhbGciOiJSUzI1NiJ9.payload.sig");
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_read_sees_rotation() {
        let path = temp_token_file("tok-A");
        let reader = TokenFileReader::new(&path);
        assert_eq!(reader.read().await.unwrap().expose(), "tok-A");

        std::fs::write(&path, "tok-B").unwrap();
        assert_eq!(reader.read().await.unwrap().expose(), "tok-B");
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_missing_file() {
        let reader = TokenFileReader::new("/nonexistent/azure-identity-token");
        let err = reader.read().await.unwrap_err();
        assert!(matches!(err, KeyVaultError::AssertionUnavailable { .. }));
        assert!(err.is_auth_error());
    }

    #[tokio::test]
    async fn test_empty_file() {
        let path = temp_token_file(" \n\t");
        let err = TokenFileReader::new(&path).read().await.unwrap_err();
        assert!(
            matches!(err, KeyVaultError::AssertionUnavailable { ref reason, .. } if reason == "file is empty")
        );
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_debug_redacts() {
        let token = AssertionToken(SecretString::from("tok-A".to_string()));
        let debug = format!("{token:?}");
        assert!(!debug.contains("tok-A"));
        assert!(debug.contains("[REDACTED]"));
    }
}
