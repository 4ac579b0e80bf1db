//! Azure Key Vault over its REST API.
//!
//! Rotation metadata lives in secret tags; expiry maps onto the secret's
//! `exp` attribute. Keys are created through `keys/{name}/create`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{StorageLocation, bind_parameters};
use crate::audit::{AuditLogger, AuditRecord, AuditResult};
use crate::azure::http::send_json;
use crate::azure::{Authorization, CredentialCache, KEY_VAULT_SCOPE, RetryPolicy};
use crate::error::{Error, Result};
use crate::manifest::{KeySpec, KeyType, Parameters};
use crate::services::Services;
use crate::types::{SecretProperties, SecretValue};

const API_VERSION: &str = "7.4";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct KeyVaultParameters {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Attributes {
    #[serde(default)]
    exp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretItem {
    id: String,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretPage {
    #[serde(default)]
    value: Vec<SecretItem>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: String,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    tags: Option<BTreeMap<String, String>>,
}

fn expires_from(attributes: &Attributes) -> Option<DateTime<Utc>> {
    attributes
        .exp
        .and_then(|exp| DateTime::from_timestamp(exp, 0))
}

fn name_from_id(id: &str) -> &str {
    id.trim_end_matches('/').rsplit('/').next().unwrap_or(id)
}

fn curve_for(size: u32) -> Result<&'static str> {
    match size {
        256 => Ok("P-256"),
        384 => Ok("P-384"),
        521 => Ok("P-521"),
        other => Err(Error::invalid_parameters(
            "key",
            format!("unsupported EC key size {other}; use 256, 384 or 521"),
        )),
    }
}

/// An Azure Key Vault.
pub struct KeyVaultStorage {
    uri: String,
    http: reqwest::Client,
    credentials: Arc<CredentialCache>,
    retry: RetryPolicy,
    audit: Arc<dyn AuditLogger>,
    identity: String,
}

impl KeyVaultStorage {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "azure-key-vault";

    /// Creates a client for the vault at `uri`.
    #[must_use]
    pub fn new(uri: impl Into<String>, services: &Services) -> Self {
        Self {
            uri: uri.into().trim_end_matches('/').to_string(),
            http: services.http.clone(),
            credentials: services.credentials.clone(),
            retry: services.retry,
            audit: services.audit.clone(),
            identity: services.identity.clone(),
        }
    }

    /// Factory used by the storage registry; accepts `name` or `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] unless exactly one of `name` and `uri` is set.
    pub fn create(parameters: &Parameters, services: &Services) -> Result<Arc<dyn StorageLocation>> {
        let params: KeyVaultParameters = bind_parameters(Self::TYPE_NAME, parameters)?;
        let uri = match (params.name, params.uri) {
            (Some(name), None) => format!("https://{name}.{}", services.endpoints.key_vault_suffix),
            (None, Some(uri)) => uri,
            _ => {
                return Err(Error::invalid_parameters(
                    Self::TYPE_NAME,
                    "exactly one of 'name' or 'uri' is required",
                ));
            }
        };
        Ok(Arc::new(Self::new(uri, services)))
    }

    async fn call(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Option<serde_json::Value>> {
        let token = self.credentials.token(KEY_VAULT_SCOPE).await?;
        send_json(
            &self.http,
            method,
            url,
            &Authorization::Bearer(token.secret().to_string()),
            body,
            &self.retry,
        )
        .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}?api-version={API_VERSION}", self.uri)
    }

    fn audit(&self, name: &str, operation: &str, result: AuditResult) {
        self.audit.log(&AuditRecord::new(
            &self.identity,
            format!("{}/{name}", self.uri),
            operation,
            result,
        ));
    }

    async fn create_key(&self, name: &str, key: &KeySpec) -> Result<()> {
        let body = match key.key_type {
            KeyType::Rsa => json!({ "kty": "RSA", "key_size": key.size }),
            KeyType::Ec => json!({ "kty": "EC", "crv": curve_for(key.size)? }),
        };
        self.call(Method::POST, &self.url(&format!("keys/{name}/create")), Some(&body))
            .await?;
        Ok(())
    }
}

impl StorageLocation for KeyVaultStorage {
    fn label(&self) -> String {
        self.uri.clone()
    }

    fn list_secrets(&self) -> BoxFuture<'_, Result<Vec<SecretProperties>>> {
        Box::pin(async move {
            let mut secrets = Vec::new();
            let mut next = Some(self.url("secrets"));
            while let Some(url) = next.take() {
                let Some(page) = self.call(Method::GET, &url, None).await? else {
                    break;
                };
                let page: SecretPage = serde_json::from_value(page)?;
                for item in page.value {
                    secrets.push(SecretProperties {
                        name: name_from_id(&item.id).to_string(),
                        expires_on: expires_from(&item.attributes),
                        tags: item.tags.unwrap_or_default(),
                    });
                }
                next = page.next_link.filter(|link| !link.is_empty());
            }
            debug!(vault = %self.uri, count = secrets.len(), "listed secrets");
            Ok(secrets)
        })
    }

    fn get_secret_value<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<SecretValue>>> {
        Box::pin(async move {
            let Some(body) = self
                .call(Method::GET, &self.url(&format!("secrets/{name}")), None)
                .await?
            else {
                return Ok(None);
            };
            let bundle: SecretBundle = serde_json::from_value(body)?;
            Ok(Some(SecretValue::from_stored(
                bundle.value,
                expires_from(&bundle.attributes),
                bundle.tags.unwrap_or_default(),
            )))
        })
    }

    fn set_secret_value<'a>(
        &'a self,
        name: &'a str,
        value: &'a SecretValue,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut body = json!({
                "value": value.value(),
                "tags": value.tags_for_storage(),
            });
            if let Some(expires) = value.expires_on {
                body["attributes"] = json!({ "exp": expires.timestamp() });
            }
            let result = self
                .call(Method::PUT, &self.url(&format!("secrets/{name}")), Some(&body))
                .await
                .map(|_| ());
            match &result {
                Ok(()) => {
                    info!(vault = %self.uri, secret = %name, "secret updated");
                    self.audit(name, "set-secret", AuditResult::Success);
                }
                Err(e) => {
                    warn!(vault = %self.uri, secret = %name, error = %e, "secret update failed");
                    self.audit(name, "set-secret", AuditResult::Failure);
                }
            }
            result
        })
    }

    fn ensure_key<'a>(&'a self, name: &'a str, key: &'a KeySpec) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self
                .call(Method::GET, &self.url(&format!("keys/{name}")), None)
                .await?
                .is_some()
            {
                debug!(vault = %self.uri, key = %name, "key exists");
                return Ok(());
            }
            info!(vault = %self.uri, key = %name, key_type = %key.key_type, size = key.size, "creating key");
            let result = self.create_key(name, key).await;
            let outcome = if result.is_ok() {
                AuditResult::Success
            } else {
                AuditResult::Failure
            };
            self.audit(name, "create-key", outcome);
            result
        })
    }
}

impl std::fmt::Debug for KeyVaultStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVaultStorage")
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLogger;
    use crate::azure::StaticTokenCredential;
    use crate::types::NEXT_ROTATION_ON_TAG;
    use chrono::{Duration, TimeZone};
    use test_case::test_case;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn services(audit: Arc<MemoryAuditLogger>) -> Services {
        Services::builder()
            .credential(Arc::new(StaticTokenCredential::new(
                "kv-token",
                Utc::now() + Duration::hours(1),
            )))
            .audit(audit)
            .identity("pipeline")
            .retry(RetryPolicy::immediate(2))
            .build()
    }

    fn vault(server: &MockServer, audit: Arc<MemoryAuditLogger>) -> KeyVaultStorage {
        KeyVaultStorage::new(server.uri(), &services(audit))
    }

    #[test_case("name = \"v\"", true ; "name")]
    #[test_case("uri = \"https://v.vault.azure.net/\"", true ; "uri")]
    #[test_case("", false ; "neither")]
    #[test_case("name = \"v\"\nuri = \"https://v\"", false ; "both")]
    fn factory_parameters(text: &str, ok: bool) {
        let params: Parameters = toml::from_str(text).expect("toml");
        let services = Services::builder().build();
        let created = KeyVaultStorage::create(&params, &services);
        assert_eq!(created.is_ok(), ok);
        if let Ok(store) = created {
            assert_eq!(store.label(), "https://v.vault.azure.net");
        }
    }

    #[tokio::test]
    async fn lists_across_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secrets"))
            .and(query_param("api-version", API_VERSION))
            .and(header("authorization", "Bearer kv-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    { "id": format!("{}/secrets/first", server.uri()), "attributes": { "exp": 1_800_000_000 },
                      "tags": { "next-rotation-on": "2026-01-01T00:00:00Z" } }
                ],
                "nextLink": format!("{}/secrets-page-2?api-version=7.4", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/secrets-page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [ { "id": format!("{}/secrets/second", server.uri()) } ],
                "nextLink": null
            })))
            .mount(&server)
            .await;

        let secrets = vault(&server, Arc::new(MemoryAuditLogger::new()))
            .list_secrets()
            .await
            .expect("list");
        let names: Vec<_> = secrets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(secrets[0].expires_on, DateTime::from_timestamp(1_800_000_000, 0));
        assert!(secrets[1].tags.is_empty());
    }

    #[tokio::test]
    async fn missing_secret_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secrets/absent"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "code": "SecretNotFound" }
            })))
            .mount(&server)
            .await;

        let value = vault(&server, Arc::new(MemoryAuditLogger::new()))
            .get_secret_value("absent")
            .await
            .expect("get");
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn get_reads_schedule_from_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secrets/db"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": "pw",
                "id": format!("{}/secrets/db/abc", server.uri()),
                "attributes": {},
                "tags": { "next-rotation-on": "2026-02-01T00:00:00Z", "currentKey": "key1" }
            })))
            .mount(&server)
            .await;

        let value = vault(&server, Arc::new(MemoryAuditLogger::new()))
            .get_secret_value("db")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(value.value(), "pw");
        assert_eq!(
            value.next_rotation_on,
            Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).single()
        );
        assert_eq!(value.tags.get("currentKey").map(String::as_str), Some("key1"));
    }

    #[tokio::test]
    async fn set_sends_tags_and_expiry_and_audits() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/secrets/db"))
            .and(body_partial_json(json!({
                "value": "new",
                "tags": { NEXT_ROTATION_ON_TAG: "2026-03-01T00:00:00Z" },
                "attributes": { "exp": 1_790_000_000 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "x" })))
            .expect(1)
            .mount(&server)
            .await;

        let audit = Arc::new(MemoryAuditLogger::new());
        let next = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().expect("valid time");
        vault(&server, audit.clone())
            .set_secret_value(
                "db",
                &SecretValue::new("new")
                    .with_next_rotation_on(next)
                    .with_expires_on(DateTime::from_timestamp(1_790_000_000, 0)),
            )
            .await
            .expect("set");

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "pipeline");
        assert_eq!(records[0].operation, "set-secret");
        assert_eq!(records[0].result, AuditResult::Success);
    }

    #[tokio::test]
    async fn failed_set_is_audited_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let audit = Arc::new(MemoryAuditLogger::new());
        let result = vault(&server, audit.clone())
            .set_secret_value("db", &SecretValue::new("new"))
            .await;
        assert!(result.is_err());
        assert_eq!(audit.records()[0].result, AuditResult::Failure);
    }

    #[tokio::test]
    async fn ensure_key_creates_only_missing_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/keys/existing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "key": {} })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/keys/fresh"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/keys/fresh/create"))
            .and(body_partial_json(json!({ "kty": "EC", "crv": "P-384" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "key": {} })))
            .expect(1)
            .mount(&server)
            .await;

        let store = vault(&server, Arc::new(MemoryAuditLogger::new()));
        let spec = KeySpec {
            key_type: KeyType::Ec,
            size: 384,
        };
        store.ensure_key("existing", &spec).await.expect("existing");
        store.ensure_key("fresh", &spec).await.expect("fresh");
    }

    #[test]
    fn unsupported_curve_is_rejected() {
        assert!(curve_for(255).is_err());
        assert_eq!(name_from_id("https://v/secrets/name"), "name");
    }
}
