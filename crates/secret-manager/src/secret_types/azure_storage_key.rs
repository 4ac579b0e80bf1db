//! Azure storage account keys.
//!
//! The account has two keys. Each rotation regenerates the one not handed
//! out last time and records it as `currentKey`, so consumers of the live
//! key keep working until they pick up the new value.

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

use super::{CURRENT_KEY, SecretType, months_from};
use crate::azure::ArmClient;
use crate::context::RotationContext;
use crate::error::Result;
use crate::types::SecretData;

/// Parameters for [`AzureStorageKey`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AzureStorageKeyParameters {
    /// Subscription id.
    pub subscription: String,
    /// Resource group of the account.
    pub resource_group: String,
    /// Storage account name.
    pub account: String,
}

/// Regenerates storage account keys, alternating between `key1` and `key2`.
#[derive(Debug, Clone)]
pub struct AzureStorageKey {
    arm: ArmClient,
}

impl AzureStorageKey {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "azure-storage-key";

    /// Creates the type.
    #[must_use]
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }
}

/// The key to regenerate given the one currently handed out.
fn next_key(current: &str) -> &'static str {
    if current == "key1" { "key2" } else { "key1" }
}

impl SecretType for AzureStorageKey {
    type Parameters = AzureStorageKeyParameters;

    fn rotate_values<'a>(
        &'a self,
        parameters: &'a Self::Parameters,
        context: &'a mut RotationContext,
    ) -> BoxFuture<'a, Result<Vec<SecretData>>> {
        Box::pin(async move {
            let key_name = next_key(&context.get_value(CURRENT_KEY, "key2"));
            context.check_cancelled()?;
            let value = self
                .arm
                .regenerate_storage_key(
                    &parameters.subscription,
                    &parameters.resource_group,
                    &parameters.account,
                    key_name,
                )
                .await?;
            context.set_value(CURRENT_KEY, key_name)?;
            info!(secret = %context.name(), account = %parameters.account, key = key_name, "storage key rotated");
            Ok(vec![SecretData::new(value, None, months_from(context.now(), 6))])
        })
    }
}
