//! Azure plumbing shared by storage locations and secret types.

pub mod arm;
pub mod credential;
pub mod http;

pub use arm::{ArmClient, EventHubKeys, EventHubRule};
pub use credential::{
    AccessToken, ClientSecretCredential, CredentialCache, MissingCredential,
    StaticTokenCredential, TokenCredential,
};
pub use http::{Authorization, RetryPolicy};

/// Scope for Azure Resource Manager.
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
/// Scope for Azure Key Vault data plane.
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";
/// Scope for Azure DevOps.
pub const DEVOPS_SCOPE: &str = "499b84ac-1321-427f-aa17-267ca6975798/.default";

/// Base URLs of the Azure services in use; overridable for sovereign clouds and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureEndpoints {
    /// Resource Manager endpoint.
    pub management: String,
    /// Identity platform authority.
    pub authority: String,
    /// DNS suffix for Key Vault names.
    pub key_vault_suffix: String,
    /// Azure DevOps endpoint.
    pub devops: String,
}

impl Default for AzureEndpoints {
    fn default() -> Self {
        Self {
            management: "https://management.azure.com".to_string(),
            authority: "https://login.microsoftonline.com".to_string(),
            key_vault_suffix: "vault.azure.net".to_string(),
            devops: "https://dev.azure.com".to_string(),
        }
    }
}
