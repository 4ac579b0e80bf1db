//! Storage locations: where secret values and keys live.
//!
//! Each backend implements [`StorageLocation`] and is registered by name in a
//! [`StorageLocationRegistry`]; the manifest's `storageLocation` and
//! `references` sections pick a backend and its parameters.

pub mod file;
pub mod key_vault;
pub mod memory;
pub mod service_connection;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::manifest::{KeySpec, Parameters, StorageLocationSpec};
use crate::services::Services;
use crate::types::{SecretProperties, SecretValue};

pub use file::FileStorage;
pub use key_vault::KeyVaultStorage;
pub use memory::MemoryStorage;
pub use service_connection::ServiceConnectionStorage;

/// Maximum attempts for a conditional write before giving up with [`Error::Conflict`].
pub const MAX_CONDITIONAL_WRITE_ATTEMPTS: u32 = 5;

/// Runs `attempt` until it reports a committed write.
///
/// Each attempt re-reads the entry's version and commits only if it is
/// unchanged, returning `Ok(false)` when another writer got there first.
pub(crate) async fn retry_conditional<F, Fut>(name: &str, mut attempt: F) -> Result<()>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for n in 1..=MAX_CONDITIONAL_WRITE_ATTEMPTS {
        if attempt(n).await? {
            return Ok(());
        }
    }
    Err(Error::Conflict {
        name: name.to_string(),
        attempts: MAX_CONDITIONAL_WRITE_ATTEMPTS,
    })
}

/// A backing store for secrets and keys.
pub trait StorageLocation: Send + Sync {
    /// Short label for logs and audit records.
    fn label(&self) -> String;

    /// Lists the properties of every stored secret.
    fn list_secrets(&self) -> BoxFuture<'_, Result<Vec<SecretProperties>>>;

    /// Reads a secret; `Ok(None)` when it does not exist.
    fn get_secret_value<'a>(&'a self, name: &'a str)
    -> BoxFuture<'a, Result<Option<SecretValue>>>;

    /// Writes a secret, attaching `next-rotation-on` and the value's tags.
    fn set_secret_value<'a>(
        &'a self,
        name: &'a str,
        value: &'a SecretValue,
    ) -> BoxFuture<'a, Result<()>>;

    /// Creates the key if it does not exist yet.
    fn ensure_key<'a>(&'a self, name: &'a str, key: &'a KeySpec) -> BoxFuture<'a, Result<()>>;
}

/// Builds a storage location from manifest parameters.
pub trait StorageLocationFactory: Send + Sync {
    /// Creates the location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] if the parameters do not fit.
    fn create(
        &self,
        parameters: &Parameters,
        services: &Services,
    ) -> Result<Arc<dyn StorageLocation>>;
}

impl<F> StorageLocationFactory for F
where
    F: Fn(&Parameters, &Services) -> Result<Arc<dyn StorageLocation>> + Send + Sync,
{
    fn create(
        &self,
        parameters: &Parameters,
        services: &Services,
    ) -> Result<Arc<dyn StorageLocation>> {
        self(parameters, services)
    }
}

/// Deserializes manifest parameters into a typed parameter struct.
///
/// # Errors
///
/// Returns [`Error::InvalidParameters`] naming `owner` when binding fails.
pub fn bind_parameters<T: DeserializeOwned>(owner: &str, parameters: &Parameters) -> Result<T> {
    toml::Value::Table(parameters.clone())
        .try_into()
        .map_err(|e: toml::de::Error| Error::invalid_parameters(owner, e.message().to_string()))
}

/// Storage location factories by type name.
pub struct StorageLocationRegistry {
    factories: BTreeMap<String, Arc<dyn StorageLocationFactory>>,
}

impl StorageLocationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Creates a registry with every built-in backend.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(KeyVaultStorage::TYPE_NAME, KeyVaultStorage::create);
        registry.register(
            ServiceConnectionStorage::TYPE_NAME,
            ServiceConnectionStorage::create,
        );
        registry.register(FileStorage::TYPE_NAME, FileStorage::create);
        registry.register(MemoryStorage::TYPE_NAME, memory::NamedMemoryStores::default());
        registry
    }

    /// Registers (or replaces) a factory.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        factory: impl StorageLocationFactory + 'static,
    ) {
        self.factories.insert(type_name.into(), Arc::new(factory));
    }

    /// Registers an existing instance under `type_name`, ignoring parameters.
    pub fn register_instance(
        &mut self,
        type_name: impl Into<String>,
        location: Arc<dyn StorageLocation>,
    ) {
        self.register(
            type_name,
            move |_: &Parameters, _: &Services| -> Result<Arc<dyn StorageLocation>> {
                Ok(location.clone())
            },
        );
    }

    /// Creates the location a manifest section describes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStorageType`] for unregistered types and any
    /// factory error.
    pub fn create(
        &self,
        spec: &StorageLocationSpec,
        services: &Services,
    ) -> Result<Arc<dyn StorageLocation>> {
        let factory =
            self.factories
                .get(&spec.type_name)
                .ok_or_else(|| Error::UnknownStorageType {
                    type_name: spec.type_name.clone(),
                })?;
        factory.create(&spec.parameters, services)
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for StorageLocationRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for StorageLocationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageLocationRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase", deny_unknown_fields)]
    struct VaultParams {
        name: String,
        #[serde(default)]
        resource_group: Option<String>,
    }

    fn params(text: &str) -> Parameters {
        toml::from_str(text).expect("valid toml")
    }

    #[test]
    fn bind_parameters_uses_camel_case() {
        let bound: VaultParams =
            bind_parameters("vault", &params("name = \"v\"\nresourceGroup = \"rg\"")).expect("bind");
        assert_eq!(
            bound,
            VaultParams {
                name: "v".into(),
                resource_group: Some("rg".into())
            }
        );
    }

    #[test]
    fn bind_parameters_reports_owner_on_failure() {
        let err = bind_parameters::<VaultParams>("vault", &params("other = 1")).expect_err("invalid");
        match err {
            Error::InvalidParameters { name, .. } => assert_eq!(name, "vault"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn registry_knows_builtin_types() {
        let registry = StorageLocationRegistry::with_defaults();
        assert_eq!(
            registry.type_names(),
            vec!["azure-devops-service-connection", "azure-key-vault", "file", "memory"]
        );
    }

    #[test]
    fn registry_rejects_unknown_type() {
        let registry = StorageLocationRegistry::with_defaults();
        let spec = StorageLocationSpec {
            type_name: "floppy-disk".into(),
            parameters: Parameters::new(),
        };
        let err = registry
            .create(&spec, &Services::builder().build())
            .err()
            .expect("unknown type");
        assert!(matches!(err, Error::UnknownStorageType { .. }));
    }

    #[tokio::test]
    async fn conditional_retry_stops_at_first_commit() {
        let mut seen = Vec::new();
        retry_conditional("s", |n| {
            seen.push(n);
            async move { Ok(n == 3) }
        })
        .await
        .expect("third attempt commits");
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn conditional_retry_gives_up_with_conflict() {
        let err = retry_conditional("s", |_| async { Ok(false) })
            .await
            .expect_err("never commits");
        assert!(matches!(err, Error::Conflict { ref name, attempts } if name == "s" && attempts == MAX_CONDITIONAL_WRITE_ATTEMPTS));
    }

    #[tokio::test]
    async fn conditional_retry_propagates_errors() {
        let err = retry_conditional("s", |_| async { Err(Error::storage("disk gone")) })
            .await
            .expect_err("error");
        assert!(matches!(err, Error::Storage { .. }));
    }

    #[test]
    fn registry_returns_registered_instance() {
        let store = Arc::new(MemoryStorage::new("shared"));
        let mut registry = StorageLocationRegistry::new();
        registry.register_instance("memory", store.clone());

        let spec = StorageLocationSpec {
            type_name: "memory".into(),
            parameters: Parameters::new(),
        };
        let created = registry.create(&spec, &Services::builder().build()).expect("created");
        assert_eq!(created.label(), store.label());
    }
}
