//! Federated workload-identity credential.
//!
//! Exchanges the mounted assertion token for an access token at the
//! tenant's OAuth2 token endpoint and caches the result per scope set.
//!
//! - A cached token is reused while `now + safety_margin < expires_at`.
//! - At most one exchange per scope set is in flight. It runs as a detached
//!   task, so a waiter that gives up never cancels it for the others.
//! - A failed refresh leaves the cache untouched and is reported to every
//!   waiter; an expired token is never handed out in its place. A refresh
//!   task that dies without publishing (panic, abort, runtime shutdown) is
//!   replaced by the next caller.
//! - The cached expiry for a scope set never moves backwards.

use crate::{
    assertion::TokenFileReader,
    config::CredentialConfig,
    error::{KeyVaultError, KeyVaultResult},
    provider::TokenCredential,
    secrets::{TokenErrorResponse, TokenResponse},
    token::{AccessToken, ScopeKey},
};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rust_common::{Counter, build_http_client, metrics};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

type InflightRefresh = Shared<BoxFuture<'static, KeyVaultResult<AccessToken>>>;

struct Inflight {
    id: u64,
    refresh: InflightRefresh,
    task: AbortHandle,
}

impl Inflight {
    /// The task publishes and clears its own marker before it finishes, so a
    /// finished task still registered here never published.
    fn is_orphaned(&self) -> bool {
        self.task.is_finished() || self.refresh.peek().is_some()
    }
}

#[derive(Default)]
struct CacheSlot {
    token: Option<AccessToken>,
    inflight: Option<Inflight>,
}

impl CacheSlot {
    fn clear_inflight(&mut self, id: u64) {
        if self.inflight.as_ref().is_some_and(|i| i.id == id) {
            self.inflight = None;
        }
    }
}

/// Counters kept by a [`FederatedCredential`].
#[derive(Debug)]
pub struct CredentialMetrics {
    /// Successful token exchanges
    pub exchanges: Counter,
    /// Failed refreshes (assertion read, exchange or timeout)
    pub exchange_failures: Counter,
    /// Requests served from cache
    pub cache_hits: Counter,
}

impl CredentialMetrics {
    fn new() -> Self {
        Self {
            exchanges: Counter::new(
                "federated_credential_exchanges_total",
                "Successful federated token exchanges",
            ),
            exchange_failures: Counter::new(
                "federated_credential_exchange_failures_total",
                "Failed federated token refreshes",
            ),
            cache_hits: Counter::new(
                "federated_credential_cache_hits_total",
                "Token requests served from cache",
            ),
        }
    }

    /// Prometheus text exposition of all counters.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        metrics::render(&[&self.exchanges, &self.exchange_failures, &self.cache_hits])
    }
}

struct Inner {
    config: CredentialConfig,
    http: reqwest::Client,
    reader: TokenFileReader,
    cache: Mutex<HashMap<ScopeKey, CacheSlot>>,
    next_refresh_id: AtomicU64,
    metrics: CredentialMetrics,
}

/// Credential that trades a federated assertion for access tokens.
///
/// Cheap to clone; clones share the token cache.
#[derive(Clone)]
pub struct FederatedCredential {
    inner: Arc<Inner>,
}

impl FederatedCredential {
    /// Validate `config` and build the credential.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::InvalidConfig`] when a required value is
    /// missing or the HTTP client cannot be built.
    pub fn new(config: CredentialConfig) -> KeyVaultResult<Self> {
        config.validate()?;
        let http = build_http_client(&config.http)?;
        let reader = TokenFileReader::new(config.token_file_path.clone());

        info!(
            tenant_id = %config.tenant_id,
            client_id = %config.client_id,
            authority = %config.authority(),
            "Federated credential configured"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                reader,
                cache: Mutex::new(HashMap::new()),
                next_refresh_id: AtomicU64::new(0),
                metrics: CredentialMetrics::new(),
            }),
        })
    }

    /// Configuration this credential was built with.
    #[must_use]
    pub fn config(&self) -> &CredentialConfig {
        &self.inner.config
    }

    /// Exchange and cache counters.
    #[must_use]
    pub fn metrics(&self) -> &CredentialMetrics {
        &self.inner.metrics
    }

    /// Get a token for an already canonicalized scope set.
    ///
    /// Cancelling this future only abandons this caller's wait; a refresh it
    /// started keeps running and its result is cached for the next caller.
    ///
    /// # Errors
    ///
    /// Any assertion-read, exchange, transport or timeout failure of the
    /// refresh this call waited on.
    #[instrument(skip(self, key), fields(scopes = %key))]
    pub async fn get_token_for(&self, key: &ScopeKey) -> KeyVaultResult<AccessToken> {
        let refresh = {
            let mut cache = self.inner.cache.lock();
            let slot = cache.entry(key.clone()).or_default();

            if let Some(token) = slot
                .token
                .as_ref()
                .filter(|t| t.is_fresh(self.inner.config.safety_margin))
            {
                self.inner.metrics.cache_hits.inc();
                return Ok(token.clone());
            }

            match &slot.inflight {
                Some(inflight) if !inflight.is_orphaned() => {
                    debug!("Joining in-flight token refresh");
                    inflight.refresh.clone()
                }
                stale => {
                    if let Some(orphan) = stale {
                        warn!(
                            refresh_id = orphan.id,
                            "Token refresh task ended without publishing, restarting"
                        );
                    }
                    let id = self.inner.next_refresh_id.fetch_add(1, Ordering::Relaxed);
                    let inflight = Inner::spawn_refresh(&self.inner, key.clone(), id);
                    let refresh = inflight.refresh.clone();
                    slot.inflight = Some(inflight);
                    refresh
                }
            }
        };

        refresh.await
    }
}

#[async_trait]
impl TokenCredential for FederatedCredential {
    async fn get_token(&self, scopes: &[&str]) -> KeyVaultResult<AccessToken> {
        let key = ScopeKey::new(scopes.iter().copied())?;
        self.get_token_for(&key).await
    }
}

impl std::fmt::Debug for FederatedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederatedCredential")
            .field("tenant_id", &self.inner.config.tenant_id)
            .field("client_id", &self.inner.config.client_id)
            .field("authority", &self.inner.config.authority())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn spawn_refresh(inner: &Arc<Self>, key: ScopeKey, id: u64) -> Inflight {
        let span = info_span!("token_refresh", scopes = %key, refresh_id = id);
        let handle = tokio::spawn(Arc::clone(inner).refresh(key.clone(), id).instrument(span));
        let task = handle.abort_handle();
        let owner: Weak<Self> = Arc::downgrade(inner);

        let refresh = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Some(inner) = owner.upgrade() {
                        inner.cache.lock().entry(key).or_default().clear_inflight(id);
                        inner.metrics.exchange_failures.inc();
                    }
                    warn!(refresh_id = id, error = %e, "Token refresh task ended without publishing");
                    Err(KeyVaultError::unavailable(format!("token refresh task failed: {e}")))
                }
            }
        }
        .boxed()
        .shared();

        Inflight { id, refresh, task }
    }

    /// Run one bounded refresh, then publish its outcome and clear the
    /// in-flight marker under a single lock.
    async fn refresh(self: Arc<Self>, key: ScopeKey, id: u64) -> KeyVaultResult<AccessToken> {
        let bound = self.config.exchange_timeout;
        let outcome = match tokio::time::timeout(bound, self.exchange(&key)).await {
            Ok(result) => result,
            Err(_) => Err(KeyVaultError::Timeout(bound)),
        };

        let published = {
            let mut cache = self.cache.lock();
            let slot = cache.entry(key).or_default();
            slot.clear_inflight(id);

            outcome.map(|fresh| {
                let stored = match slot.token.take() {
                    Some(cached) if cached.expires_at() > fresh.expires_at() => cached,
                    _ => fresh,
                };
                slot.token = Some(stored.clone());
                stored
            })
        };

        match &published {
            Ok(token) => {
                self.metrics.exchanges.inc();
                info!(
                    expires_at = %token.expires_at(),
                    lifetime_secs = token.remaining().as_secs(),
                    "Access token refreshed"
                );
            }
            Err(e) => {
                self.metrics.exchange_failures.inc();
                warn!(error = %e, "Access token refresh failed");
            }
        }

        published
    }

    async fn exchange(&self, key: &ScopeKey) -> KeyVaultResult<AccessToken> {
        let assertion = self.reader.read().await?;
        let scope = key.to_scope_param();
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.expose()),
            ("scope", scope.as_str()),
        ];

        let issued_at = Utc::now();
        let response = self
            .http
            .post(self.config.token_endpoint())
            .form(&form)
            .send()
            .await
            .map_err(|e| KeyVaultError::unavailable(format!("token endpoint: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| KeyVaultError::unavailable(format!("token endpoint body: {e}")))?;

        if !status.is_success() {
            let parsed: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_default();
            return Err(KeyVaultError::ExchangeRejected {
                status: status.as_u16(),
                detail: parsed.detail(&body),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)?;
        if parsed.access_token.is_empty() {
            return Err(KeyVaultError::invalid_response("empty access_token"));
        }
        if parsed.expires_in == 0 {
            return Err(KeyVaultError::invalid_response("token already expired"));
        }
        if let Some(token_type) = parsed.token_type.as_deref() {
            if !token_type.eq_ignore_ascii_case("bearer") {
                return Err(KeyVaultError::invalid_response(format!(
                    "unsupported token_type {token_type}"
                )));
            }
        }

        let lifetime = Duration::from_secs(parsed.expires_in);
        if lifetime <= self.config.safety_margin {
            warn!(
                lifetime_secs = parsed.expires_in,
                safety_margin_secs = self.config.safety_margin.as_secs(),
                "Issued token lifetime is within the safety margin; every request will refresh"
            );
        }

        Ok(AccessToken::from_lifetime(parsed.access_token, issued_at, lifetime))
    }
}
