//! Access tokens for Azure APIs.
//!
//! [`CredentialCache`] is created once per process (see
//! [`Services`](crate::services::Services)) and hands out cached tokens per
//! scope until shortly before they expire.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;
use zeroize::Zeroizing;

use crate::clock::Clock;
use crate::error::{Error, Result};

/// Tokens this close to expiry are refreshed.
pub const REFRESH_MARGIN_MINUTES: i64 = 5;

/// A bearer token and its expiry.
#[derive(Clone)]
pub struct AccessToken {
    token: Zeroizing<String>,
    /// When the token stops being accepted.
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    /// Creates a token.
    #[must_use]
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            expires_on,
        }
    }

    /// Returns the raw token.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Something that can produce tokens for a scope.
pub trait TokenCredential: Send + Sync {
    /// Acquires a fresh token for `scope`.
    fn get_token<'a>(&'a self, scope: &'a str) -> BoxFuture<'a, Result<AccessToken>>;
}

/// OAuth2 client-credentials flow against the Microsoft identity platform.
pub struct ClientSecretCredential {
    http: reqwest::Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: Zeroizing<String>,
    clock: Arc<dyn Clock>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl ClientSecretCredential {
    /// Creates a credential for an app registration.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        authority: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            authority: authority.into(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: Zeroizing::new(client_secret.into()),
            clock,
        }
    }
}

impl TokenCredential for ClientSecretCredential {
    fn get_token<'a>(&'a self, scope: &'a str) -> BoxFuture<'a, Result<AccessToken>> {
        Box::pin(async move {
            let url = format!(
                "{}/{}/oauth2/v2.0/token",
                self.authority.trim_end_matches('/'),
                self.tenant_id
            );
            let form = [
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope),
            ];
            let response = self.http.post(&url).form(&form).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Credential {
                    reason: format!("token request for '{scope}' returned {status}: {body}"),
                });
            }
            let token: TokenResponse = response.json().await?;
            debug!(scope, expires_in = token.expires_in, "acquired access token");
            Ok(AccessToken::new(
                token.access_token,
                self.clock.now() + Duration::seconds(token.expires_in),
            ))
        })
    }
}

impl std::fmt::Debug for ClientSecretCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecretCredential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Returns the same token for every scope.
#[derive(Debug, Clone)]
pub struct StaticTokenCredential {
    token: AccessToken,
}

impl StaticTokenCredential {
    /// Creates a credential that always returns `token`, valid until `expires_on`.
    #[must_use]
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: AccessToken::new(token, expires_on),
        }
    }
}

impl TokenCredential for StaticTokenCredential {
    fn get_token<'a>(&'a self, _scope: &'a str) -> BoxFuture<'a, Result<AccessToken>> {
        Box::pin(async move { Ok(self.token.clone()) })
    }
}

/// Fails every request; the default when no identity is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingCredential;

impl TokenCredential for MissingCredential {
    fn get_token<'a>(&'a self, scope: &'a str) -> BoxFuture<'a, Result<AccessToken>> {
        Box::pin(async move {
            Err(Error::Credential {
                reason: format!(
                    "no Azure credential configured (needed for '{scope}'); set AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET"
                ),
            })
        })
    }
}

/// Caches tokens per scope in front of a [`TokenCredential`].
pub struct CredentialCache {
    credential: Arc<dyn TokenCredential>,
    clock: Arc<dyn Clock>,
    tokens: Mutex<HashMap<String, AccessToken>>,
}

impl CredentialCache {
    /// Wraps `credential`.
    #[must_use]
    pub fn new(credential: Arc<dyn TokenCredential>, clock: Arc<dyn Clock>) -> Self {
        Self {
            credential,
            clock,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a token for `scope`, reusing a cached one while it is fresh.
    ///
    /// # Errors
    ///
    /// Returns the underlying credential's error.
    pub async fn token(&self, scope: &str) -> Result<AccessToken> {
        let refresh_after = self.clock.now() + Duration::minutes(REFRESH_MARGIN_MINUTES);
        if let Some(cached) = self.tokens.lock().get(scope) {
            if cached.expires_on > refresh_after {
                return Ok(cached.clone());
            }
        }

        let token = self.credential.get_token(scope).await?;
        self.tokens.lock().insert(scope.to_string(), token.clone());
        Ok(token)
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("cached_scopes", &self.tokens.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingCredential {
        calls: AtomicUsize,
        lifetime: Duration,
        clock: Arc<FixedClock>,
    }

    impl TokenCredential for CountingCredential {
        fn get_token<'a>(&'a self, scope: &'a str) -> BoxFuture<'a, Result<AccessToken>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(AccessToken::new(
                    format!("{scope}-{n}"),
                    self.clock.now() + self.lifetime,
                ))
            })
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid time")
    }

    #[tokio::test]
    async fn cache_reuses_fresh_tokens_per_scope() {
        let clock = Arc::new(FixedClock::new(start()));
        let inner = Arc::new(CountingCredential {
            calls: AtomicUsize::new(0),
            lifetime: Duration::hours(1),
            clock: clock.clone(),
        });
        let cache = CredentialCache::new(inner.clone(), clock.clone());

        let a = cache.token("scope-a").await.expect("token");
        let again = cache.token("scope-a").await.expect("token");
        let b = cache.token("scope-b").await.expect("token");

        assert_eq!(a.secret(), again.secret());
        assert_ne!(a.secret(), b.secret());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_refreshes_tokens_near_expiry() {
        let clock = Arc::new(FixedClock::new(start()));
        let inner = Arc::new(CountingCredential {
            calls: AtomicUsize::new(0),
            lifetime: Duration::minutes(30),
            clock: clock.clone(),
        });
        let cache = CredentialCache::new(inner.clone(), clock.clone());

        let first = cache.token("scope").await.expect("token");
        clock.advance(Duration::minutes(26));
        let second = cache.token("scope").await.expect("token");

        assert_ne!(first.secret(), second.secret());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_credential_explains_configuration() {
        let err = MissingCredential.get_token("scope").await.expect_err("no credential");
        assert!(err.to_string().contains("AZURE_CLIENT_ID"));
    }

    #[tokio::test]
    async fn client_secret_credential_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let clock = Arc::new(FixedClock::new(start()));
        let credential = ClientSecretCredential::new(
            reqwest::Client::new(),
            server.uri(),
            "tenant",
            "client",
            "secret",
            clock,
        );
        let token = credential
            .get_token("https://vault.azure.net/.default")
            .await
            .expect("token");
        assert_eq!(token.secret(), "abc");
        assert_eq!(token.expires_on, start() + Duration::hours(1));
    }
}
