//! Connection strings built from a storage account key held in another secret.

use futures::future::BoxFuture;
use serde::Deserialize;

use super::{SecretType, months_from};
use crate::context::RotationContext;
use crate::error::Result;
use crate::types::{SecretData, SecretReference};

/// Parameters for [`AzureStorageConnectionString`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AzureStorageConnectionStringParameters {
    /// Storage account name.
    pub account: String,
    /// Secret holding the account key.
    pub storage_key: SecretReference,
    /// DNS suffix of the storage endpoints.
    #[serde(default = "default_endpoint_suffix")]
    pub endpoint_suffix: String,
}

fn default_endpoint_suffix() -> String {
    "core.windows.net".to_string()
}

/// Builds a connection string from the referenced key, following its schedule.
#[derive(Debug, Clone, Copy, Default)]
pub struct AzureStorageConnectionString;

impl AzureStorageConnectionString {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "azure-storage-connection-string";
}

impl SecretType for AzureStorageConnectionString {
    type Parameters = AzureStorageConnectionStringParameters;

    fn secret_references(&self, parameters: &Self::Parameters) -> Vec<SecretReference> {
        vec![parameters.storage_key.clone()]
    }

    fn rotate_values<'a>(
        &'a self,
        parameters: &'a Self::Parameters,
        context: &'a mut RotationContext,
    ) -> BoxFuture<'a, Result<Vec<SecretData>>> {
        Box::pin(async move {
            let key = context.require_secret_value(&parameters.storage_key).await?;
            let connection_string = format!(
                "DefaultEndpointsProtocol=https;AccountName={};AccountKey={};EndpointSuffix={}",
                parameters.account,
                key.value(),
                parameters.endpoint_suffix
            );
            let next_rotation_on = key
                .next_rotation_on
                .unwrap_or_else(|| months_from(context.now(), 6));
            Ok(vec![SecretData::new(
                connection_string,
                key.expires_on,
                next_rotation_on,
            )])
        })
    }
}
