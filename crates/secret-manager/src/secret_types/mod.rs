//! Secret types: generators producing new values for a secret.
//!
//! A type implements [`SecretType`] with a strongly typed parameter struct.
//! The [`SecretTypeRegistry`] maps the manifest's type name onto a type and
//! binds a secret's parameters, yielding a [`BoundSecret`] the engine can
//! drive without knowing the parameter type.

pub mod azure_storage_connection_string;
pub mod azure_storage_key;
pub mod base64_encoder;
pub mod event_hub_connection_string;
pub mod github_account;
pub mod random_base64;
pub mod text;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::context::RotationContext;
use crate::error::{Error, Result};
use crate::manifest::SecretSpec;
use crate::services::Services;
use crate::storage::bind_parameters;
use crate::types::{SecretData, SecretReference};

pub use azure_storage_connection_string::AzureStorageConnectionString;
pub use azure_storage_key::AzureStorageKey;
pub use base64_encoder::Base64Encoder;
pub use event_hub_connection_string::EventHubConnectionString;
pub use github_account::GitHubAccount;
pub use random_base64::RandomBase64;
pub use text::Text;

/// Suffixes of a simple, single-valued secret.
pub const SINGLE_VALUE: &[&str] = &[""];

/// Generic state kept by alternating types to remember the live credential.
pub const CURRENT_KEY: &str = "currentKey";

/// A generator of secret values.
pub trait SecretType: Send + Sync + 'static {
    /// Parameters bound from the manifest.
    type Parameters: DeserializeOwned + Send + Sync + 'static;

    /// Name suffixes this type writes; one [`SecretData`] per suffix, in order.
    fn composite_suffixes(&self) -> &'static [&'static str] {
        SINGLE_VALUE
    }

    /// Other secrets this type reads while rotating.
    fn secret_references(&self, _parameters: &Self::Parameters) -> Vec<SecretReference> {
        Vec::new()
    }

    /// Produces new values.
    ///
    /// May call external services or the operator; callers invoke it once per
    /// logical rotation.
    fn rotate_values<'a>(
        &'a self,
        parameters: &'a Self::Parameters,
        context: &'a mut RotationContext,
    ) -> BoxFuture<'a, Result<Vec<SecretData>>>;
}

/// A secret type with its parameters bound.
pub trait BoundSecret: Send + Sync {
    /// Registered type name.
    fn type_name(&self) -> &str;

    /// See [`SecretType::composite_suffixes`].
    fn composite_suffixes(&self) -> &'static [&'static str];

    /// See [`SecretType::secret_references`].
    fn secret_references(&self) -> Vec<SecretReference>;

    /// See [`SecretType::rotate_values`].
    fn rotate_values<'a>(
        &'a self,
        context: &'a mut RotationContext,
    ) -> BoxFuture<'a, Result<Vec<SecretData>>>;
}

struct Bound<T: SecretType> {
    type_name: String,
    secret_type: Arc<T>,
    parameters: T::Parameters,
}

impl<T: SecretType> BoundSecret for Bound<T> {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn composite_suffixes(&self) -> &'static [&'static str] {
        self.secret_type.composite_suffixes()
    }

    fn secret_references(&self) -> Vec<SecretReference> {
        self.secret_type.secret_references(&self.parameters)
    }

    fn rotate_values<'a>(
        &'a self,
        context: &'a mut RotationContext,
    ) -> BoxFuture<'a, Result<Vec<SecretData>>> {
        self.secret_type.rotate_values(&self.parameters, context)
    }
}

trait SecretTypeBinder: Send + Sync {
    fn bind(&self, secret: &str, spec: &SecretSpec) -> Result<Arc<dyn BoundSecret>>;
}

struct TypedBinder<T: SecretType> {
    type_name: String,
    secret_type: Arc<T>,
}

impl<T: SecretType> SecretTypeBinder for TypedBinder<T> {
    fn bind(&self, secret: &str, spec: &SecretSpec) -> Result<Arc<dyn BoundSecret>> {
        let parameters: T::Parameters = bind_parameters(secret, &spec.parameters)?;
        Ok(Arc::new(Bound {
            type_name: self.type_name.clone(),
            secret_type: self.secret_type.clone(),
            parameters,
        }))
    }
}

/// Secret types by name.
pub struct SecretTypeRegistry {
    binders: BTreeMap<String, Arc<dyn SecretTypeBinder>>,
}

impl SecretTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binders: BTreeMap::new(),
        }
    }

    /// Creates a registry with every built-in type.
    #[must_use]
    pub fn with_defaults(services: &Services) -> Self {
        let mut registry = Self::new();
        registry.register(RandomBase64::TYPE_NAME, RandomBase64);
        registry.register(Base64Encoder::TYPE_NAME, Base64Encoder);
        registry.register(Text::TYPE_NAME, Text);
        registry.register(AzureStorageKey::TYPE_NAME, AzureStorageKey::new(services.arm()));
        registry.register(
            AzureStorageConnectionString::TYPE_NAME,
            AzureStorageConnectionString,
        );
        registry.register(
            EventHubConnectionString::TYPE_NAME,
            EventHubConnectionString::new(services.arm()),
        );
        registry.register(GitHubAccount::TYPE_NAME, GitHubAccount);
        registry
    }

    /// Registers (or replaces) a type.
    pub fn register<T: SecretType>(&mut self, type_name: impl Into<String>, secret_type: T) {
        let type_name = type_name.into();
        self.binders.insert(
            type_name.clone(),
            Arc::new(TypedBinder {
                type_name,
                secret_type: Arc::new(secret_type),
            }),
        );
    }

    /// Binds a manifest secret to its type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSecretType`] or [`Error::InvalidParameters`].
    pub fn bind(&self, secret: &str, spec: &SecretSpec) -> Result<Arc<dyn BoundSecret>> {
        let binder = self
            .binders
            .get(&spec.type_name)
            .ok_or_else(|| Error::UnknownSecretType {
                secret: secret.to_string(),
                type_name: spec.type_name.clone(),
            })?;
        binder.bind(secret, spec)
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<&str> {
        self.binders.keys().map(String::as_str).collect()
    }
}

impl Default for SecretTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SecretTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretTypeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

/// Adds calendar months, saturating at the far future.
#[must_use]
pub fn months_from(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_add_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Generates an alphanumeric password of `length` characters.
#[must_use]
pub fn generate_password(length: usize) -> String {
    use rand::Rng;
    use rand::distributions::Alphanumeric;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
