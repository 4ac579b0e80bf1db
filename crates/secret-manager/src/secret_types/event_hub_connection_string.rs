//! Event hub connection strings backed by an authorization rule.
//!
//! Like storage keys, the rule's primary and secondary keys alternate; the
//! one handed out last is left alone while the other is regenerated.

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

use super::{CURRENT_KEY, SecretType, months_from};
use crate::azure::{ArmClient, EventHubRule};
use crate::context::RotationContext;
use crate::error::{Error, Result};
use crate::types::SecretData;

/// Parameters for [`EventHubConnectionString`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventHubConnectionStringParameters {
    /// Subscription id.
    pub subscription: String,
    /// Resource group of the namespace.
    pub resource_group: String,
    /// Event Hubs namespace.
    pub namespace: String,
    /// Event hub name.
    pub name: String,
    /// Comma-separated rights: any of `listen`, `send`, `manage`.
    pub permissions: String,
}

/// Maintains an authorization rule named after the secret and hands out its keys.
#[derive(Debug, Clone)]
pub struct EventHubConnectionString {
    arm: ArmClient,
}

impl EventHubConnectionString {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "event-hub-connection-string";

    /// Creates the type.
    #[must_use]
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }
}

fn parse_rights(secret: &str, permissions: &str) -> Result<Vec<String>> {
    let mut rights = Vec::new();
    for raw in permissions.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let right = match raw.to_ascii_lowercase().as_str() {
            "listen" => "Listen",
            "send" => "Send",
            "manage" => "Manage",
            _ => {
                return Err(Error::invalid_parameters(
                    secret,
                    format!("unknown event hub permission '{raw}'"),
                ));
            }
        };
        if !rights.iter().any(|r| r == right) {
            rights.push(right.to_string());
        }
    }
    if rights.is_empty() {
        return Err(Error::invalid_parameters(secret, "permissions cannot be empty"));
    }
    Ok(rights)
}

impl SecretType for EventHubConnectionString {
    type Parameters = EventHubConnectionStringParameters;

    fn rotate_values<'a>(
        &'a self,
        parameters: &'a Self::Parameters,
        context: &'a mut RotationContext,
    ) -> BoxFuture<'a, Result<Vec<SecretData>>> {
        Box::pin(async move {
            let rights = parse_rights(context.name(), &parameters.permissions)?;
            let rule = EventHubRule {
                subscription: parameters.subscription.clone(),
                resource_group: parameters.resource_group.clone(),
                namespace: parameters.namespace.clone(),
                event_hub: parameters.name.clone(),
                rule: context.name().to_string(),
            };

            context.check_cancelled()?;
            self.arm.upsert_event_hub_rule(&rule, &rights).await?;

            let use_primary = context.get_value(CURRENT_KEY, "secondary") != "primary";
            let (key_type, current) = if use_primary {
                ("PrimaryKey", "primary")
            } else {
                ("SecondaryKey", "secondary")
            };
            context.check_cancelled()?;
            let keys = self.arm.regenerate_event_hub_key(&rule, key_type).await?;
            let connection_string = if use_primary {
                keys.primary_connection_string
            } else {
                keys.secondary_connection_string
            };

            context.set_value(CURRENT_KEY, current)?;
            info!(secret = %context.name(), namespace = %parameters.namespace, event_hub = %parameters.name, key = current, "event hub key rotated");
            Ok(vec![SecretData::new(
                connection_string,
                None,
                months_from(context.now(), 6),
            )])
        })
    }
}
