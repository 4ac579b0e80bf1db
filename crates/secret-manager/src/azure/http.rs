//! JSON-over-HTTPS calls with retry for Azure REST APIs.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Retry behaviour for throttled or failing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that retries immediately; for tests.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1` (attempts are 1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// How a request authenticates.
#[derive(Clone)]
pub enum Authorization {
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// `Authorization: Basic base64(:<pat>)`, as Azure DevOps expects for PATs.
    PersonalAccessToken(String),
}

impl Authorization {
    fn header_value(&self) -> String {
        match self {
            Self::Bearer(token) => format!("Bearer {token}"),
            Self::PersonalAccessToken(pat) => format!("Basic {}", STANDARD.encode(format!(":{pat}"))),
        }
    }
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => write!(f, "Bearer([REDACTED])"),
            Self::PersonalAccessToken(_) => write!(f, "PersonalAccessToken([REDACTED])"),
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Sends a JSON request and returns the parsed body.
///
/// `404 Not Found` yields `Ok(None)`; an empty success body yields
/// `Some(Value::Null)`. Throttling, timeouts and server errors are retried
/// according to `retry`, honouring `Retry-After` when present.
///
/// # Errors
///
/// Returns [`Error::Http`] for non-success statuses and transport failures.
pub async fn send_json(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    auth: &Authorization,
    body: Option<&serde_json::Value>,
    retry: &RetryPolicy,
) -> Result<Option<serde_json::Value>> {
    let mut attempt = 1;
    loop {
        let mut request = http
            .request(method.clone(), url)
            .header(AUTHORIZATION, auth.header_value());
        if let Some(body) = body {
            request = request.json(body);
        }

        let failure = match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::NOT_FOUND {
                    debug!(%method, url, "resource not found");
                    return Ok(None);
                }
                if status.is_success() {
                    let text = response.text().await?;
                    if text.trim().is_empty() {
                        return Ok(Some(serde_json::Value::Null));
                    }
                    return Ok(Some(serde_json::from_str(&text)?));
                }

                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                let text = response.text().await.unwrap_or_default();
                let snippet: String = text.chars().take(200).collect();
                (
                    Error::Http {
                        reason: format!("{method} {url} returned {status}: {snippet}"),
                        retryable: is_retryable_status(status),
                    },
                    retry_after,
                )
            }
            Err(e) => (Error::from(e), None),
        };

        let (error, retry_after) = failure;
        if !error.is_retryable() || attempt >= retry.max_attempts {
            return Err(error);
        }

        let delay = retry_after
            .unwrap_or_else(|| retry.delay_after(attempt))
            .min(retry.max_delay.max(retry.base_delay));
        warn!(%method, url, attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying request");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(350));
    }

    #[test]
    fn authorization_debug_is_redacted() {
        let auth = Authorization::Bearer("token-value".into());
        assert!(!format!("{auth:?}").contains("token-value"));
        assert_eq!(
            Authorization::PersonalAccessToken("pat".into()).header_value(),
            format!("Basic {}", STANDARD.encode(":pat"))
        );
    }

    #[tokio::test]
    async fn returns_none_on_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = send_json(
            &reqwest::Client::new(),
            Method::GET,
            &format!("{}/missing", server.uri()),
            &Authorization::Bearer("t".into()),
            None,
            &RetryPolicy::immediate(3),
        )
        .await
        .expect("request");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn retries_throttled_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .and(header("authorization", "Bearer t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&server)
            .await;

        let result = send_json(
            &reqwest::Client::new(),
            Method::GET,
            &format!("{}/busy", server.uri()),
            &Authorization::Bearer("t".into()),
            None,
            &RetryPolicy::immediate(3),
        )
        .await
        .expect("request");
        assert_eq!(result, Some(json!({ "ok": true })));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let err = send_json(
            &reqwest::Client::new(),
            Method::GET,
            &format!("{}/down", server.uri()),
            &Authorization::Bearer("t".into()),
            None,
            &RetryPolicy::immediate(2),
        )
        .await
        .expect_err("should fail");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let err = send_json(
            &reqwest::Client::new(),
            Method::PUT,
            &format!("{}/forbidden", server.uri()),
            &Authorization::Bearer("t".into()),
            Some(&json!({ "value": "x" })),
            &RetryPolicy::immediate(3),
        )
        .await
        .expect_err("should fail");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("403"));
    }
}
