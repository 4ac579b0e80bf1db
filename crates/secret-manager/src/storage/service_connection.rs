//! Azure DevOps service connections as a storage location.
//!
//! Service connection credentials are write-only: reads return an empty
//! value. The endpoint's description carries the rotation metadata as a magic
//! string, since service connections have no tags.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{StorageLocation, bind_parameters};
use crate::audit::{AuditLogger, AuditRecord, AuditResult};
use crate::azure::http::send_json;
use crate::azure::{Authorization, CredentialCache, DEVOPS_SCOPE, RetryPolicy};
use crate::error::{Error, Result};
use crate::magic::{create_magic_string, parse_magic_string};
use crate::manifest::{KeySpec, Parameters};
use crate::services::Services;
use crate::types::{NEXT_ROTATION_ON_TAG, SecretProperties, SecretValue, format_tag_time};

const API_VERSION: &str = "7.1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ServiceConnectionParameters {
    organization: String,
    project: String,
}

#[derive(Debug, Deserialize)]
struct EndpointList {
    #[serde(default)]
    value: Vec<Value>,
}

/// Stands in for "no expiry" in the description, which always holds a date.
fn no_expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX)
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
}

/// Rotation metadata recovered from an endpoint's description.
fn properties_of(endpoint: &Value) -> Option<SecretProperties> {
    let name = endpoint.get("name")?.as_str()?;
    let mut properties = SecretProperties::new(name);
    let description = endpoint
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if let Some((expires, next)) = parse_magic_string(description) {
        properties.expires_on = if expires == no_expiry() {
            None
        } else {
            midnight(expires)
        };
        if let Some(next) = midnight(next) {
            properties
                .tags
                .insert(NEXT_ROTATION_ON_TAG.to_string(), format_tag_time(next));
        }
    }
    Some(properties)
}

/// Azure DevOps service connections in one project.
pub struct ServiceConnectionStorage {
    organization: String,
    project: String,
    base_url: String,
    http: reqwest::Client,
    credentials: Arc<CredentialCache>,
    token: Option<String>,
    retry: RetryPolicy,
    audit: Arc<dyn AuditLogger>,
    identity: String,
}

impl ServiceConnectionStorage {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "azure-devops-service-connection";

    /// Creates a store for `organization/project`.
    #[must_use]
    pub fn new(organization: impl Into<String>, project: impl Into<String>, services: &Services) -> Self {
        Self {
            organization: organization.into(),
            project: project.into(),
            base_url: services.endpoints.devops.trim_end_matches('/').to_string(),
            http: services.http.clone(),
            credentials: services.credentials.clone(),
            token: services.devops_token.clone(),
            retry: services.retry,
            audit: services.audit.clone(),
            identity: services.identity.clone(),
        }
    }

    /// Factory used by the storage registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] if `organization` or `project` is missing.
    pub fn create(parameters: &Parameters, services: &Services) -> Result<Arc<dyn StorageLocation>> {
        let params: ServiceConnectionParameters = bind_parameters(Self::TYPE_NAME, parameters)?;
        Ok(Arc::new(Self::new(params.organization, params.project, services)))
    }

    async fn authorization(&self) -> Result<Authorization> {
        if let Some(pat) = &self.token {
            return Ok(Authorization::PersonalAccessToken(pat.clone()));
        }
        let token = self.credentials.token(DEVOPS_SCOPE).await?;
        Ok(Authorization::Bearer(token.secret().to_string()))
    }

    async fn call(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Option<Value>> {
        let auth = self.authorization().await?;
        send_json(&self.http, method, url, &auth, body, &self.retry).await
    }

    async fn endpoints(&self, name: Option<&str>) -> Result<Vec<Value>> {
        let mut url = format!(
            "{}/{}/{}/_apis/serviceendpoint/endpoints?api-version={API_VERSION}",
            self.base_url, self.organization, self.project
        );
        if let Some(name) = name {
            url.push_str("&endpointNames=");
            url.push_str(name);
        }
        let Some(body) = self.call(Method::GET, &url, None).await? else {
            return Ok(Vec::new());
        };
        let list: EndpointList = serde_json::from_value(body)?;
        Ok(list.value)
    }

    async fn find(&self, name: &str) -> Result<Option<Value>> {
        Ok(self
            .endpoints(Some(name))
            .await?
            .into_iter()
            .find(|e| e.get("name").and_then(Value::as_str) == Some(name)))
    }

    fn audit(&self, name: &str, result: AuditResult) {
        self.audit.log(&AuditRecord::new(
            &self.identity,
            format!("{}/{name}", self.label()),
            "set-service-connection",
            result,
        ));
    }

    async fn update(&self, name: &str, value: &SecretValue) -> Result<()> {
        let mut endpoint = self.find(name).await?.ok_or_else(|| {
            Error::human_intervention(
                name,
                format!(
                    "service connection does not exist in {}/{}; create it in Azure DevOps first",
                    self.organization, self.project
                ),
            )
        })?;
        let id = endpoint
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::storage(format!("service connection '{name}' has no id")))?;

        let expires = value.expires_on.map_or_else(no_expiry, |e| e.date_naive());
        let next = value.next_rotation_on.map_or(expires, |n| n.date_naive());
        endpoint["description"] = Value::String(create_magic_string(expires, next));

        let scheme = endpoint
            .pointer("/authorization/scheme")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let field = if scheme.eq_ignore_ascii_case("UsernamePassword") {
            "password"
        } else {
            "apitoken"
        };
        let mut authorization = endpoint
            .get("authorization")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "scheme": "Token" }));
        let mut parameters: BTreeMap<String, Value> = authorization
            .get("parameters")
            .cloned()
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();
        parameters.insert(field.to_string(), Value::String(value.value().to_string()));
        authorization["parameters"] = serde_json::to_value(parameters)?;
        endpoint["authorization"] = authorization;

        let url = format!(
            "{}/{}/_apis/serviceendpoint/endpoints/{id}?api-version={API_VERSION}",
            self.base_url, self.organization
        );
        self.call(Method::PUT, &url, Some(&endpoint)).await?;
        info!(connection = %name, organization = %self.organization, project = %self.project, "service connection updated");
        Ok(())
    }
}

impl StorageLocation for ServiceConnectionStorage {
    fn label(&self) -> String {
        format!("devops:{}/{}", self.organization, self.project)
    }

    fn list_secrets(&self) -> BoxFuture<'_, Result<Vec<SecretProperties>>> {
        Box::pin(async move {
            let secrets: Vec<_> = self
                .endpoints(None)
                .await?
                .iter()
                .filter_map(properties_of)
                .collect();
            debug!(organization = %self.organization, project = %self.project, count = secrets.len(), "listed service connections");
            Ok(secrets)
        })
    }

    fn get_secret_value<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<SecretValue>>> {
        Box::pin(async move {
            let Some(endpoint) = self.find(name).await? else {
                return Ok(None);
            };
            Ok(properties_of(&endpoint)
                .map(|props| SecretValue::from_stored(String::new(), props.expires_on, props.tags)))
        })
    }

    fn set_secret_value<'a>(
        &'a self,
        name: &'a str,
        value: &'a SecretValue,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let result = self.update(name, value).await;
            match &result {
                Ok(()) => self.audit(name, AuditResult::Success),
                Err(e) => {
                    warn!(connection = %name, error = %e, "service connection update failed");
                    self.audit(name, AuditResult::Failure);
                }
            }
            result
        })
    }

    fn ensure_key<'a>(&'a self, name: &'a str, _key: &'a KeySpec) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            Err(Error::storage(format!(
                "service connections cannot hold keys (requested '{name}')"
            )))
        })
    }
}

impl std::fmt::Debug for ServiceConnectionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConnectionStorage")
            .field("organization", &self.organization)
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLogger;
    use crate::azure::AzureEndpoints;
    use crate::error::ErrorKind;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer, audit: Arc<MemoryAuditLogger>) -> ServiceConnectionStorage {
        let services = Services::builder()
            .devops_token(Some("pat".into()))
            .endpoints(AzureEndpoints {
                devops: server.uri(),
                ..AzureEndpoints::default()
            })
            .audit(audit)
            .retry(RetryPolicy::immediate(1))
            .build();
        ServiceConnectionStorage::new("org", "proj", &services)
    }

    fn endpoint(name: &str, description: &str) -> Value {
        json!({
            "id": format!("{name}-id"),
            "name": name,
            "type": "generic",
            "description": description,
            "authorization": { "scheme": "UsernamePassword", "parameters": { "username": "bot" } }
        })
    }

    #[tokio::test]
    async fn lists_metadata_from_descriptions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/org/proj/_apis/serviceendpoint/endpoints"))
            .and(header(
                "authorization",
                format!("Basic {}", STANDARD.encode(":pat")).as_str(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 2,
                "value": [
                    endpoint("nuget-feed", "expires-on:2027-01-01;next-rotation-on:2026-06-01"),
                    endpoint("manual", "maintained by hand")
                ]
            })))
            .mount(&server)
            .await;

        let secrets = store(&server, Arc::new(MemoryAuditLogger::new()))
            .list_secrets()
            .await
            .expect("list");
        assert_eq!(secrets.len(), 2);
        assert_eq!(
            secrets[0].expires_on,
            Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).single()
        );
        assert_eq!(
            secrets[0].tags.get(NEXT_ROTATION_ON_TAG).map(String::as_str),
            Some("2026-06-01T00:00:00Z")
        );
        assert!(secrets[1].tags.is_empty());
    }

    #[tokio::test]
    async fn values_are_write_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("endpointNames", "nuget-feed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [ endpoint("nuget-feed", "expires-on:2027-01-01;next-rotation-on:2026-06-01") ]
            })))
            .mount(&server)
            .await;

        let value = store(&server, Arc::new(MemoryAuditLogger::new()))
            .get_secret_value("nuget-feed")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(value.value(), "");
        assert!(value.next_rotation_on.is_some());
    }

    #[tokio::test]
    async fn update_writes_magic_string_and_password() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("endpointNames", "nuget-feed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [ endpoint("nuget-feed", "") ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/org/_apis/serviceendpoint/endpoints/nuget-feed-id"))
            .and(body_partial_json(json!({
                "description": "expires-on:9999-12-31;next-rotation-on:2026-08-01",
                "authorization": { "parameters": { "username": "bot", "password": "fresh" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let audit = Arc::new(MemoryAuditLogger::new());
        let next = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).single().expect("valid time");
        store(&server, audit.clone())
            .set_secret_value("nuget-feed", &SecretValue::new("fresh").with_next_rotation_on(next))
            .await
            .expect("set");
        assert_eq!(audit.records()[0].result, AuditResult::Success);
        assert_eq!(audit.records()[0].resource, "devops:org/proj/nuget-feed");
    }

    #[tokio::test]
    async fn missing_connection_needs_an_operator() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 0, "value": [] })))
            .mount(&server)
            .await;

        let err = store(&server, Arc::new(MemoryAuditLogger::new()))
            .set_secret_value("absent", &SecretValue::new("x"))
            .await
            .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::HumanIntervention);
    }

    #[tokio::test]
    async fn keys_are_unsupported() {
        let server = MockServer::start().await;
        let spec = KeySpec {
            key_type: crate::manifest::KeyType::Rsa,
            size: 2048,
        };
        let err = store(&server, Arc::new(MemoryAuditLogger::new()))
            .ensure_key("k", &spec)
            .await
            .expect_err("unsupported");
        assert!(matches!(err, Error::Storage { .. }));
    }
}
