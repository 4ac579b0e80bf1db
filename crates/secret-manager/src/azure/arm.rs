//! The few Azure Resource Manager operations secret types rely on.

use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::credential::CredentialCache;
use super::http::{Authorization, RetryPolicy, send_json};
use super::MANAGEMENT_SCOPE;
use crate::error::{Error, Result};

const STORAGE_API_VERSION: &str = "2023-01-01";
const EVENT_HUB_API_VERSION: &str = "2021-11-01";

/// Identifies an event hub authorization rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHubRule {
    /// Subscription id.
    pub subscription: String,
    /// Resource group name.
    pub resource_group: String,
    /// Event Hubs namespace.
    pub namespace: String,
    /// Event hub name.
    pub event_hub: String,
    /// Authorization rule name.
    pub rule: String,
}

impl EventHubRule {
    fn path(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.EventHub/namespaces/{}/eventhubs/{}/authorizationRules/{}",
            self.subscription, self.resource_group, self.namespace, self.event_hub, self.rule
        )
    }
}

/// Connection strings for both keys of an authorization rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHubKeys {
    /// Connection string using the primary key.
    pub primary_connection_string: String,
    /// Connection string using the secondary key.
    pub secondary_connection_string: String,
}

#[derive(Deserialize)]
struct StorageKeyList {
    keys: Vec<StorageKey>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageKey {
    key_name: String,
    value: String,
}

/// Client for Azure Resource Manager.
#[derive(Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    credentials: Arc<CredentialCache>,
    endpoint: String,
    retry: RetryPolicy,
}

impl ArmClient {
    /// Creates a client against `endpoint` (normally `https://management.azure.com`).
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        credentials: Arc<CredentialCache>,
        endpoint: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            credentials,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        api_version: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let token = self.credentials.token(MANAGEMENT_SCOPE).await?;
        let url = format!("{}{path}?api-version={api_version}", self.endpoint);
        send_json(
            &self.http,
            method,
            &url,
            &Authorization::Bearer(token.secret().to_string()),
            body,
            &self.retry,
        )
        .await?
        .ok_or_else(|| Error::Http {
            reason: format!("resource not found: {path}"),
            retryable: false,
        })
    }

    /// Regenerates one key of a storage account and returns its new value.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the response lacks the key.
    pub async fn regenerate_storage_key(
        &self,
        subscription: &str,
        resource_group: &str,
        account: &str,
        key_name: &str,
    ) -> Result<String> {
        let path = format!(
            "/subscriptions/{subscription}/resourceGroups/{resource_group}/providers/Microsoft.Storage/storageAccounts/{account}/regenerateKey"
        );
        info!(account, key_name, "regenerating storage account key");
        let body = json!({ "keyName": key_name });
        let response = self
            .call(Method::POST, &path, STORAGE_API_VERSION, Some(&body))
            .await?;
        let list: StorageKeyList = serde_json::from_value(response)?;
        list.keys
            .into_iter()
            .find(|k| k.key_name.eq_ignore_ascii_case(key_name))
            .map(|k| k.value)
            .ok_or_else(|| Error::Http {
                reason: format!("regenerateKey response for '{account}' lacks '{key_name}'"),
                retryable: false,
            })
    }

    /// Creates or updates an authorization rule with the given rights.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn upsert_event_hub_rule(&self, rule: &EventHubRule, rights: &[String]) -> Result<()> {
        let body = json!({ "properties": { "rights": rights } });
        self.call(Method::PUT, &rule.path(), EVENT_HUB_API_VERSION, Some(&body))
            .await?;
        Ok(())
    }

    /// Regenerates `PrimaryKey` or `SecondaryKey` of a rule and returns both connection strings.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the response is malformed.
    pub async fn regenerate_event_hub_key(
        &self,
        rule: &EventHubRule,
        key_type: &str,
    ) -> Result<EventHubKeys> {
        info!(namespace = %rule.namespace, event_hub = %rule.event_hub, rule = %rule.rule, key_type, "regenerating event hub key");
        let path = format!("{}/regenerateKeys", rule.path());
        let body = json!({ "keyType": key_type });
        let response = self
            .call(Method::POST, &path, EVENT_HUB_API_VERSION, Some(&body))
            .await?;
        Ok(serde_json::from_value(response)?)
    }
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
