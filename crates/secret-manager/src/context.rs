//! Per-secret scratch space handed to a secret type during rotation.
//!
//! The context's value bag is versioned generator state: it is seeded from the
//! tags already stored with the secret and written back as tags with the new
//! value, so a type can remember things like which of two keys is active.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::Clock;
use crate::console::Console;
use crate::error::{Error, Result};
use crate::storage::StorageLocation;
use crate::types::{ENGINE_TAGS, SecretReference, SecretValue};

/// Mutable state for one rotation of one secret.
pub struct RotationContext {
    name: String,
    tags: BTreeMap<String, String>,
    values: BTreeMap<String, String>,
    storage: Arc<dyn StorageLocation>,
    references: BTreeMap<String, Arc<dyn StorageLocation>>,
    clock: Arc<dyn Clock>,
    console: Arc<dyn Console>,
    cancel: CancellationToken,
}

impl RotationContext {
    /// Creates a context for `name`, seeding the value bag from `tags`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        tags: BTreeMap<String, String>,
        storage: Arc<dyn StorageLocation>,
        references: BTreeMap<String, Arc<dyn StorageLocation>>,
        clock: Arc<dyn Clock>,
        console: Arc<dyn Console>,
        cancel: CancellationToken,
    ) -> Self {
        let values = tags
            .iter()
            .filter(|(k, _)| !ENGINE_TAGS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            name: name.into(),
            tags,
            values,
            storage,
            references,
            clock,
            console,
            cancel,
        }
    }

    /// The secret being rotated.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags stored with the previous value, unmodified.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Reads generator state, falling back to `default`.
    #[must_use]
    pub fn get_value(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Records generator state to persist with the new value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] for keys the engine reserves for itself.
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        if ENGINE_TAGS.contains(&key.as_str()) {
            return Err(Error::storage(format!(
                "'{key}' is reserved and cannot be set by a secret type"
            )));
        }
        self.values.insert(key, value.into());
        Ok(())
    }

    /// Reads the current value of another secret.
    ///
    /// References without a location read the primary storage location;
    /// others read the named `references` entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the run was cancelled,
    /// [`Error::Manifest`] for an unknown location and any storage error.
    pub async fn get_secret_value(&self, reference: &SecretReference) -> Result<Option<SecretValue>> {
        self.check_cancelled()?;
        let storage = match &reference.location {
            None => &self.storage,
            Some(location) => self.references.get(location).ok_or_else(|| {
                Error::manifest(format!(
                    "secret '{}' refers to unknown location '{location}'",
                    self.name
                ))
            })?,
        };
        debug!(secret = %self.name, reference = %reference, "reading referenced secret");
        storage.get_secret_value(&reference.name).await
    }

    /// Like [`Self::get_secret_value`] but treats a missing secret as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the referenced secret does not exist.
    pub async fn require_secret_value(&self, reference: &SecretReference) -> Result<SecretValue> {
        self.get_secret_value(reference).await?.ok_or_else(|| {
            Error::storage(format!(
                "secret '{}' requires '{reference}', which does not exist",
                self.name
            ))
        })
    }

    /// Current time according to the run's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Operator console.
    #[must_use]
    pub fn console(&self) -> &dyn Console {
        self.console.as_ref()
    }

    /// Fails with [`Error::Cancelled`] once the run has been cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token is cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Consumes the context, returning the value bag to persist as tags.
    #[must_use]
    pub fn into_values(self) -> BTreeMap<String, String> {
        self.values
    }
}

impl std::fmt::Debug for RotationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationContext")
            .field("name", &self.name)
            .field("values", &self.values)
            .field("storage", &self.storage.label())
            .finish_non_exhaustive()
    }
}
