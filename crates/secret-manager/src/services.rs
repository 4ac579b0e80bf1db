//! Process-wide collaborators shared by storage locations and secret types.
//!
//! A [`Services`] value is built once at startup and handed to every factory.
//! It owns the HTTP client, the credential cache, the audit logger, the
//! operator console and the clock.

use std::sync::Arc;

use crate::audit::{AuditLogger, TracingAuditLogger};
use crate::azure::{
    ArmClient, AzureEndpoints, CredentialCache, MissingCredential, RetryPolicy, TokenCredential,
};
use crate::clock::{Clock, SystemClock};
use crate::console::{Console, NonInteractiveConsole};

/// Identity recorded in `ChangedBy` tags when none is configured.
pub const DEFAULT_IDENTITY: &str = "secret-manager";

/// Shared collaborators.
#[derive(Clone)]
pub struct Services {
    /// HTTP client for every REST call.
    pub http: reqwest::Client,
    /// Token cache for Azure scopes.
    pub credentials: Arc<CredentialCache>,
    /// Personal access token for Azure DevOps, used instead of Entra tokens when set.
    pub devops_token: Option<String>,
    /// Destination for audit records.
    pub audit: Arc<dyn AuditLogger>,
    /// Operator interaction.
    pub console: Arc<dyn Console>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Identity recorded as `ChangedBy` and in audit records.
    pub identity: String,
    /// Azure service endpoints.
    pub endpoints: AzureEndpoints,
    /// Retry policy for REST calls.
    pub retry: RetryPolicy,
}

impl Services {
    /// Starts building a [`Services`] with defaults for everything.
    #[must_use]
    pub fn builder() -> ServicesBuilder {
        ServicesBuilder::default()
    }

    /// Returns a Resource Manager client sharing this value's HTTP client and credentials.
    #[must_use]
    pub fn arm(&self) -> ArmClient {
        ArmClient::new(
            self.http.clone(),
            self.credentials.clone(),
            self.endpoints.management.clone(),
            self.retry,
        )
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("identity", &self.identity)
            .field("endpoints", &self.endpoints)
            .field("devops_token", &self.devops_token.as_ref().map(|_| "[REDACTED]"))
            .field("interactive", &self.console.is_interactive())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Services`].
#[derive(Default)]
pub struct ServicesBuilder {
    http: Option<reqwest::Client>,
    credential: Option<Arc<dyn TokenCredential>>,
    devops_token: Option<String>,
    audit: Option<Arc<dyn AuditLogger>>,
    console: Option<Arc<dyn Console>>,
    clock: Option<Arc<dyn Clock>>,
    identity: Option<String>,
    endpoints: Option<AzureEndpoints>,
    retry: Option<RetryPolicy>,
}

impl ServicesBuilder {
    /// Uses a specific HTTP client.
    #[must_use]
    pub fn http(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Uses `credential` for Azure tokens.
    #[must_use]
    pub fn credential(mut self, credential: Arc<dyn TokenCredential>) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Sets the Azure DevOps personal access token.
    #[must_use]
    pub fn devops_token(mut self, token: Option<String>) -> Self {
        self.devops_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Sets the audit logger.
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Sets the operator console.
    #[must_use]
    pub fn console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = Some(console);
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the identity recorded in tags and audit records.
    #[must_use]
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Overrides Azure endpoints.
    #[must_use]
    pub fn endpoints(mut self, endpoints: AzureEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Builds the services.
    #[must_use]
    pub fn build(self) -> Services {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let credential = self
            .credential
            .unwrap_or_else(|| Arc::new(MissingCredential));
        Services {
            http: self.http.unwrap_or_default(),
            credentials: Arc::new(CredentialCache::new(credential, clock.clone())),
            devops_token: self.devops_token,
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditLogger)),
            console: self.console.unwrap_or_else(|| Arc::new(NonInteractiveConsole)),
            clock,
            identity: self
                .identity
                .unwrap_or_else(|| DEFAULT_IDENTITY.to_string()),
            endpoints: self.endpoints.unwrap_or_default(),
            retry: self.retry.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{TimeZone, Utc};

    #[test]
    fn builder_defaults() {
        let services = Services::builder().build();
        assert_eq!(services.identity, DEFAULT_IDENTITY);
        assert!(services.devops_token.is_none());
        assert!(!services.console.is_interactive());
        assert_eq!(services.endpoints, AzureEndpoints::default());
    }

    #[test]
    fn builder_overrides_and_redacts_token() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).single().expect("valid time");
        let services = Services::builder()
            .identity("alice")
            .clock(Arc::new(FixedClock::new(now)))
            .devops_token(Some("pat-value".into()))
            .build();

        assert_eq!(services.identity, "alice");
        assert_eq!(services.clock.now(), now);
        let debug = format!("{services:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("pat-value"));
    }

    #[test]
    fn empty_devops_token_is_ignored() {
        let services = Services::builder().devops_token(Some(String::new())).build();
        assert!(services.devops_token.is_none());
    }
}
