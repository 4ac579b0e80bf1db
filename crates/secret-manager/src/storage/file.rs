//! A local JSON file acting as a storage location.
//!
//! Every entry carries an ETag. A write notes the entry's ETag, then takes an
//! exclusive lock on a sidecar `<path>.lock` file, re-reads the document and
//! replaces it only if the ETag is unchanged; otherwise it retries. Readers
//! never lock because the document is replaced by an atomic rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{StorageLocation, bind_parameters, retry_conditional};
use crate::audit::{AuditLogger, AuditRecord, AuditResult};
use crate::error::{Error, Result};
use crate::manifest::{KeySpec, Parameters};
use crate::services::Services;
use crate::types::{SecretProperties, SecretValue};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileDocument {
    #[serde(default)]
    secrets: BTreeMap<String, FileEntry>,
    #[serde(default)]
    keys: BTreeMap<String, KeySpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    value: String,
    etag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_on: Option<DateTime<Utc>>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

impl FileEntry {
    fn to_value(&self) -> SecretValue {
        SecretValue::from_stored(self.value.clone(), self.expires_on, self.tags.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FileParameters {
    path: PathBuf,
}

/// Secrets kept in a JSON file.
pub struct FileStorage {
    path: PathBuf,
    audit: Arc<dyn AuditLogger>,
    identity: String,
}

impl FileStorage {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "file";

    /// Creates a store backed by `path`; the file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, audit: Arc<dyn AuditLogger>, identity: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            audit,
            identity: identity.into(),
        }
    }

    /// Factory used by the storage registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] if `path` is missing.
    pub fn create(parameters: &Parameters, services: &Services) -> Result<Arc<dyn StorageLocation>> {
        let params: FileParameters = bind_parameters(Self::TYPE_NAME, parameters)?;
        Ok(Arc::new(Self::new(
            params.path,
            services.audit.clone(),
            services.identity.clone(),
        )))
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<FileDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(FileDocument::default()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| Error::Serialization {
                reason: format!("{}: {e}", self.path.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileDocument::default()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    async fn store(&self, document: &FileDocument) -> Result<()> {
        let text = serde_json::to_string_pretty(document)?;
        let mut temp = self.path.clone().into_os_string();
        temp.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let temp = PathBuf::from(temp);
        tokio::fs::write(&temp, text)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> Error {
        Error::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".lock");
        PathBuf::from(path)
    }

    /// Blocks until this process holds the writer lock; released when the
    /// returned handle is dropped.
    async fn lock(&self) -> Result<std::fs::File> {
        let path = self.lock_path();
        let locked = tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| Error::storage(format!("lock task for {} failed: {e}", self.path.display())))?;
        locked.map_err(|source| self.io_error(source))
    }

    fn audit(&self, name: &str, operation: &str, result: AuditResult) {
        self.audit.log(&AuditRecord::new(
            &self.identity,
            format!("{}/{name}", self.label()),
            operation,
            result,
        ));
    }

    /// Replaces `name` if its ETag is still `expected`.
    ///
    /// Returns `false` without writing when another writer changed the entry.
    async fn write_if_unchanged(
        &self,
        name: &str,
        value: &SecretValue,
        expected: Option<&str>,
    ) -> Result<bool> {
        let _lock = self.lock().await?;
        let mut document = self.load().await?;
        if document.secrets.get(name).map(|e| e.etag.as_str()) != expected {
            return Ok(false);
        }
        document.secrets.insert(
            name.to_string(),
            FileEntry {
                value: value.value().to_string(),
                etag: Uuid::new_v4().to_string(),
                expires_on: value.expires_on,
                tags: value.tags_for_storage(),
            },
        );
        self.store(&document).await?;
        Ok(true)
    }

    async fn conditional_write(&self, name: &str, value: &SecretValue) -> Result<()> {
        retry_conditional(name, move |attempt| async move {
            let expected = self.load().await?.secrets.get(name).map(|e| e.etag.clone());
            let written = self.write_if_unchanged(name, value, expected.as_deref()).await?;
            if !written {
                debug!(path = %self.path.display(), secret = %name, attempt, "etag changed, retrying");
            }
            Ok(written)
        })
        .await
    }

    /// Adds the key under the writer lock; `false` if it already existed.
    async fn insert_key(&self, name: &str, key: &KeySpec) -> Result<bool> {
        let _lock = self.lock().await?;
        let mut document = self.load().await?;
        if document.keys.contains_key(name) {
            return Ok(false);
        }
        document.keys.insert(name.to_string(), *key);
        self.store(&document).await?;
        Ok(true)
    }
}

impl StorageLocation for FileStorage {
    fn label(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn list_secrets(&self) -> BoxFuture<'_, Result<Vec<SecretProperties>>> {
        Box::pin(async move {
            let document = self.load().await?;
            Ok(document
                .secrets
                .into_iter()
                .map(|(name, entry)| SecretProperties {
                    name,
                    expires_on: entry.expires_on,
                    tags: entry.tags,
                })
                .collect())
        })
    }

    fn get_secret_value<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<SecretValue>>> {
        Box::pin(async move {
            let document = self.load().await?;
            Ok(document.secrets.get(name).map(FileEntry::to_value))
        })
    }

    fn set_secret_value<'a>(
        &'a self,
        name: &'a str,
        value: &'a SecretValue,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let result = self.conditional_write(name, value).await;
            match &result {
                Ok(()) => self.audit(name, "set-secret", AuditResult::Success),
                Err(e) => {
                    warn!(path = %self.path.display(), secret = %name, error = %e, "write failed");
                    self.audit(name, "set-secret", AuditResult::Failure);
                }
            }
            result
        })
    }

    fn ensure_key<'a>(&'a self, name: &'a str, key: &'a KeySpec) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match self.insert_key(name, key).await {
                Ok(true) => {
                    self.audit(name, "create-key", AuditResult::Success);
                    Ok(())
                }
                Ok(false) => Ok(()),
                Err(e) => {
                    warn!(path = %self.path.display(), key = %name, error = %e, "key creation failed");
                    self.audit(name, "create-key", AuditResult::Failure);
                    Err(e)
                }
            }
        })
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("path", &self.path)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLogger;
    use crate::manifest::KeyType;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> (FileStorage, Arc<MemoryAuditLogger>) {
        let audit = Arc::new(MemoryAuditLogger::new());
        let store = FileStorage::new(dir.path().join("secrets.json"), audit.clone(), "tester");
        (store, audit)
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        let (store, _) = storage(&dir);
        assert!(store.list_secrets().await.expect("list").is_empty());
        assert!(store.get_secret_value("x").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn value_round_trips_with_metadata() {
        let dir = TempDir::new().expect("tempdir");
        let (store, audit) = storage(&dir);
        let next = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).single().expect("valid time");
        let expires = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).single().expect("valid time");
        let mut tags = BTreeMap::new();
        tags.insert("currentKey".to_string(), "key2".to_string());

        store
            .set_secret_value(
                "db-password",
                &SecretValue::new("s3cret")
                    .with_tags(tags)
                    .with_expires_on(Some(expires))
                    .with_next_rotation_on(next),
            )
            .await
            .expect("set");

        let read = store
            .get_secret_value("db-password")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(read.value(), "s3cret");
        assert_eq!(read.expires_on, Some(expires));
        assert_eq!(read.next_rotation_on, Some(next));
        assert_eq!(read.tags.get("currentKey").map(String::as_str), Some("key2"));
        assert_eq!(audit.records().len(), 1);
    }

    #[tokio::test]
    async fn overwrite_changes_etag_and_keeps_other_entries() {
        let dir = TempDir::new().expect("tempdir");
        let (store, _) = storage(&dir);
        store.set_secret_value("a", &SecretValue::new("1")).await.expect("a");
        store.set_secret_value("b", &SecretValue::new("2")).await.expect("b");
        let before = store.load().await.expect("load").secrets["a"].etag.clone();

        store.set_secret_value("a", &SecretValue::new("3")).await.expect("a again");

        let document = store.load().await.expect("load");
        assert_ne!(document.secrets["a"].etag, before);
        assert_eq!(document.secrets["a"].value, "3");
        assert_eq!(document.secrets["b"].value, "2");
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = TempDir::new().expect("tempdir");
        let (store, _) = storage(&dir);
        std::fs::write(store.path(), "{ not json").expect("write");
        let err = store.list_secrets().await.expect_err("corrupt");
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[tokio::test]
    async fn keys_are_created_once() {
        let dir = TempDir::new().expect("tempdir");
        let (store, audit) = storage(&dir);
        let spec = KeySpec {
            key_type: KeyType::Ec,
            size: 256,
        };
        store.ensure_key("signing", &spec).await.expect("create");
        store.ensure_key("signing", &spec).await.expect("noop");
        assert_eq!(store.load().await.expect("load").keys["signing"], spec);
        assert_eq!(audit.records().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_on_one_file_keep_every_entry() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("secrets.json");
        let audit = Arc::new(MemoryAuditLogger::new());

        let mut writers = Vec::new();
        for i in 0..32 {
            let path = path.clone();
            let audit = audit.clone();
            writers.push(tokio::spawn(async move {
                let store = FileStorage::new(path, audit, format!("writer-{i}"));
                if i % 4 == 0 {
                    let spec = KeySpec {
                        key_type: KeyType::Rsa,
                        size: 2048,
                    };
                    store.ensure_key(&format!("k{i}"), &spec).await?;
                }
                store
                    .set_secret_value(&format!("s{i}"), &SecretValue::new(format!("v{i}")))
                    .await
            }));
        }
        for writer in writers {
            writer.await.expect("join").expect("write");
        }

        let (store, _) = storage(&dir);
        let document = store.load().await.expect("load");
        assert_eq!(document.secrets.len(), 32);
        assert_eq!(document.keys.len(), 8);
        assert_eq!(document.secrets["s17"].value, "v17");
        assert_eq!(audit.records().len(), 40);
    }

    #[tokio::test]
    async fn stale_etag_loses_and_leaves_the_file_alone() {
        let dir = TempDir::new().expect("tempdir");
        let (store, _) = storage(&dir);
        let (other, _) = storage(&dir);
        store.set_secret_value("s", &SecretValue::new("first")).await.expect("first");
        let observed = store.load().await.expect("load").secrets["s"].etag.clone();

        other.set_secret_value("s", &SecretValue::new("second")).await.expect("second");
        let written = store
            .write_if_unchanged("s", &SecretValue::new("stale"), Some(&observed))
            .await
            .expect("check");

        assert!(!written);
        assert_eq!(store.load().await.expect("load").secrets["s"].value, "second");
    }

    #[tokio::test]
    async fn absent_entry_only_matches_an_absent_etag() {
        let dir = TempDir::new().expect("tempdir");
        let (store, _) = storage(&dir);

        let lost = store
            .write_if_unchanged("s", &SecretValue::new("x"), Some("made-up"))
            .await
            .expect("check");
        assert!(!lost);
        assert!(store.load().await.expect("load").secrets.is_empty());

        let won = store
            .write_if_unchanged("s", &SecretValue::new("x"), None)
            .await
            .expect("check");
        assert!(won);
    }

    #[test]
    fn factory_requires_path() {
        let services = Services::builder().build();
        let err = FileStorage::create(&Parameters::new(), &services)
            .err()
            .expect("missing path");
        assert!(matches!(err, Error::InvalidParameters { .. }));
    }
}
