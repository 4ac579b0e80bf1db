//! In-process storage location.
//!
//! Used for dry runs and as the test double for the engine: it counts calls
//! and can be told to lose the next few conditional writes to a simulated
//! concurrent writer. Real in-process writers are caught too: a write notes
//! the entry's version, yields, and commits only if the version is unchanged.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{StorageLocation, StorageLocationFactory, bind_parameters, retry_conditional};
use crate::audit::{AuditLogger, AuditRecord, AuditResult, NoopAuditLogger};
use crate::error::Result;
use crate::manifest::{KeySpec, Parameters};
use crate::services::{DEFAULT_IDENTITY, Services};
use crate::types::{SecretProperties, SecretValue};

struct VersionedValue {
    value: SecretValue,
    version: u64,
}

#[derive(Default)]
struct MemoryState {
    secrets: BTreeMap<String, VersionedValue>,
    keys: BTreeMap<String, KeySpec>,
}

/// A storage location held in memory.
pub struct MemoryStorage {
    name: String,
    state: Mutex<MemoryState>,
    audit: Arc<dyn AuditLogger>,
    identity: String,
    pending_conflicts: AtomicU32,
    gets: AtomicUsize,
    sets: AtomicUsize,
    lists: AtomicUsize,
}

impl MemoryStorage {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "memory";

    /// Creates an empty store that does not audit.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
            audit: Arc::new(NoopAuditLogger),
            identity: DEFAULT_IDENTITY.to_string(),
            pending_conflicts: AtomicU32::new(0),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        }
    }

    /// Sends audit records for writes to `audit`, attributed to `identity`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>, identity: impl Into<String>) -> Self {
        self.audit = audit;
        self.identity = identity.into();
        self
    }

    /// Stores a value directly, bypassing counters and auditing.
    pub fn insert(&self, name: impl Into<String>, value: SecretValue) {
        let name: String = name.into();
        let mut state = self.state.lock();
        let version = state.secrets.get(&name).map_or(1, |v| v.version + 1);
        state.secrets.insert(name, VersionedValue { value, version });
    }

    /// Returns a stored value without counting a read.
    #[must_use]
    pub fn secret(&self, name: &str) -> Option<SecretValue> {
        self.state.lock().secrets.get(name).map(|v| v.value.clone())
    }

    /// Names of all stored secrets.
    #[must_use]
    pub fn secret_names(&self) -> Vec<String> {
        self.state.lock().secrets.keys().cloned().collect()
    }

    /// Keys created so far.
    #[must_use]
    pub fn keys(&self) -> BTreeMap<String, KeySpec> {
        self.state.lock().keys.clone()
    }

    /// Makes the next `count` write attempts lose to a concurrent writer.
    pub fn fail_next_writes(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of `get_secret_value` calls.
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of successful `set_secret_value` calls.
    #[must_use]
    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    /// Number of `list_secrets` calls.
    #[must_use]
    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn audit(&self, name: &str, operation: &str, result: AuditResult) {
        self.audit.log(&AuditRecord::new(
            &self.identity,
            format!("{}/{name}", self.label()),
            operation,
            result,
        ));
    }

    /// Commits `value` if the entry is still at version `observed`.
    fn commit_if(&self, name: &str, value: &SecretValue, observed: Option<u64>) -> bool {
        let mut state = self.state.lock();
        let current = state.secrets.get(name).map(|v| v.version);
        if current != observed || self.take_conflict() {
            return false;
        }
        let stored = value.clone().with_tags(value.tags_for_storage());
        state.secrets.insert(
            name.to_string(),
            VersionedValue {
                value: stored,
                version: current.unwrap_or(0) + 1,
            },
        );
        true
    }

    async fn try_write(&self, name: &str, value: &SecretValue) -> Result<()> {
        retry_conditional(name, move |attempt| async move {
            let observed = self.state.lock().secrets.get(name).map(|v| v.version);
            tokio::task::yield_now().await;
            let committed = self.commit_if(name, value, observed);
            if !committed {
                debug!(store = %self.name, secret = %name, attempt, "conditional write lost, retrying");
            }
            Ok(committed)
        })
        .await
    }
}

impl StorageLocation for MemoryStorage {
    fn label(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn list_secrets(&self) -> BoxFuture<'_, Result<Vec<SecretProperties>>> {
        Box::pin(async move {
            self.lists.fetch_add(1, Ordering::SeqCst);
            let state = self.state.lock();
            Ok(state
                .secrets
                .iter()
                .map(|(name, v)| v.value.properties(name.clone()))
                .collect())
        })
    }

    fn get_secret_value<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<SecretValue>>> {
        Box::pin(async move {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self.secret(name))
        })
    }

    fn set_secret_value<'a>(
        &'a self,
        name: &'a str,
        value: &'a SecretValue,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match self.try_write(name, value).await {
                Ok(()) => {
                    self.sets.fetch_add(1, Ordering::SeqCst);
                    self.audit(name, "set-secret", AuditResult::Success);
                    Ok(())
                }
                Err(e) => {
                    warn!(store = %self.name, secret = %name, error = %e, "write failed");
                    self.audit(name, "set-secret", AuditResult::Failure);
                    Err(e)
                }
            }
        })
    }

    fn ensure_key<'a>(&'a self, name: &'a str, key: &'a KeySpec) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let created = {
                let mut state = self.state.lock();
                if state.keys.contains_key(name) {
                    false
                } else {
                    state.keys.insert(name.to_string(), *key);
                    true
                }
            };
            if created {
                self.audit(name, "create-key", AuditResult::Success);
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("name", &self.name)
            .field("secrets", &self.secret_names())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MemoryParameters {
    #[serde(default = "default_store_name")]
    name: String,
}

fn default_store_name() -> String {
    "default".to_string()
}

/// Factory handing out one shared [`MemoryStorage`] per `name` parameter.
///
/// Two manifest sections naming the same store see the same secrets.
#[derive(Default)]
pub struct NamedMemoryStores {
    stores: Mutex<BTreeMap<String, Arc<MemoryStorage>>>,
}

impl StorageLocationFactory for NamedMemoryStores {
    fn create(
        &self,
        parameters: &Parameters,
        services: &Services,
    ) -> Result<Arc<dyn StorageLocation>> {
        let params: MemoryParameters = bind_parameters(MemoryStorage::TYPE_NAME, parameters)?;
        let mut stores = self.stores.lock();
        let store = stores.entry(params.name.clone()).or_insert_with(|| {
            Arc::new(
                MemoryStorage::new(params.name)
                    .with_audit(services.audit.clone(), services.identity.clone()),
            )
        });
        Ok(store.clone())
    }
}
