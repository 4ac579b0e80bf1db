//! Secret manifests.
//!
//! A manifest is a TOML document naming a storage location, the keys and
//! secrets it must hold, and auxiliary storage locations (`references`) that
//! secret types may read from:
//!
//! ```toml
//! [storageLocation]
//! type = "azure-key-vault"
//! parameters = { name = "my-vault" }
//!
//! [secrets.storage-key]
//! type = "azure-storage-key"
//! owner = "platform-team"
//! parameters = { subscription = "...", resourceGroup = "rg", account = "acct" }
//!
//! [secrets.storage-connection]
//! type = "azure-storage-connection-string"
//! parameters = { account = "acct", storageKey = { name = "storage-key" } }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Untyped parameters as written in the manifest; bound per type.
pub type Parameters = toml::Table;

/// Maximum length of a secret name (the Azure Key Vault limit).
pub const MAX_SECRET_NAME_LENGTH: usize = 127;

/// A storage location declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageLocationSpec {
    /// Registered storage location type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Type-specific parameters.
    #[serde(default)]
    pub parameters: Parameters,
}

/// Cryptographic key algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    /// RSA key.
    #[serde(rename = "RSA")]
    Rsa,
    /// Elliptic curve key.
    #[serde(rename = "EC")]
    Ec,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa => write!(f, "RSA"),
            Self::Ec => write!(f, "EC"),
        }
    }
}

/// A key that must exist in the storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeySpec {
    /// Key algorithm.
    #[serde(rename = "type")]
    pub key_type: KeyType,
    /// Key size in bits (RSA) or curve size (EC).
    pub size: u32,
}

/// A secret declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretSpec {
    /// Registered secret type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Who to ask about this secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Type-specific parameters.
    #[serde(default)]
    pub parameters: Parameters,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ManifestDocument {
    #[serde(default)]
    import_secrets_from: Vec<String>,
    storage_location: Option<StorageLocationSpec>,
    #[serde(default)]
    references: BTreeMap<String, StorageLocationSpec>,
    #[serde(default)]
    keys: BTreeMap<String, KeySpec>,
    #[serde(default)]
    secrets: BTreeMap<String, SecretSpec>,
}

impl ManifestDocument {
    fn parse(text: &str, origin: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::manifest(format!("{origin}: {e}")))
    }
}

/// A parsed and validated manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretManifest {
    /// File the manifest was read from, if any.
    pub path: Option<PathBuf>,
    /// Where the secrets live.
    pub storage_location: StorageLocationSpec,
    /// Auxiliary storage locations, by name.
    pub references: BTreeMap<String, StorageLocationSpec>,
    /// Keys that must exist, by name.
    pub keys: BTreeMap<String, KeySpec>,
    /// Secrets to synchronize, by name.
    pub secrets: BTreeMap<String, SecretSpec>,
    /// Unresolved `importSecretsFrom` entries (only set by [`SecretManifest::parse`]).
    pub imports: Vec<String>,
}

impl SecretManifest {
    /// Parses a manifest from TOML text without touching the filesystem.
    ///
    /// `importSecretsFrom` entries are kept in [`Self::imports`] unresolved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] if the text is not a valid manifest.
    pub fn parse(text: &str) -> Result<Self> {
        let doc = ManifestDocument::parse(text, "<inline>")?;
        let manifest = Self::from_document(doc, None)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reads a manifest file, merging any `importSecretsFrom` files.
    ///
    /// Import paths are relative to the manifest's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read, parsed or validated, or if
    /// an imported secret name collides with an existing one.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let doc = ManifestDocument::parse(&read_file(path)?, &path.display().to_string())?;
        let mut manifest = Self::from_document(doc, Some(path.to_path_buf()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for import in std::mem::take(&mut manifest.imports) {
            let import_path = base.join(&import);
            let imported = ManifestDocument::parse(
                &read_file(&import_path)?,
                &import_path.display().to_string(),
            )?;
            if !imported.import_secrets_from.is_empty() {
                return Err(Error::manifest(format!(
                    "{}: imported manifests cannot import further files",
                    import_path.display()
                )));
            }
            for (name, secret) in imported.secrets {
                if manifest.secrets.contains_key(&name) {
                    return Err(Error::manifest(format!(
                        "secret '{name}' imported from '{import}' is already defined"
                    )));
                }
                manifest.secrets.insert(name, secret);
            }
        }

        manifest.validate()?;
        Ok(manifest)
    }

    fn from_document(doc: ManifestDocument, path: Option<PathBuf>) -> Result<Self> {
        let storage_location = doc
            .storage_location
            .ok_or_else(|| Error::manifest("missing [storageLocation] section"))?;
        Ok(Self {
            path,
            storage_location,
            references: doc.references,
            keys: doc.keys,
            secrets: doc.secrets,
            imports: doc.import_secrets_from,
        })
    }

    /// Checks names, types and key sizes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.storage_location.type_name.trim().is_empty() {
            return Err(Error::manifest("storageLocation.type cannot be empty"));
        }

        for (name, reference) in &self.references {
            if reference.type_name.trim().is_empty() {
                return Err(Error::manifest(format!(
                    "references.{name}.type cannot be empty"
                )));
            }
        }

        for (name, key) in &self.keys {
            validate_name(name)?;
            if key.size == 0 {
                return Err(Error::manifest(format!("keys.{name}.size must be positive")));
            }
        }

        for (name, secret) in &self.secrets {
            validate_name(name)?;
            if secret.type_name.trim().is_empty() {
                return Err(Error::manifest(format!("secrets.{name}.type cannot be empty")));
            }
        }

        Ok(())
    }

    /// Returns a short label for logs and reports.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.path
            .as_ref()
            .map_or_else(|| "<inline>".to_string(), |p| p.display().to_string())
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_SECRET_NAME_LENGTH {
        return Err(Error::manifest(format!(
            "name '{name}' must be between 1 and {MAX_SECRET_NAME_LENGTH} characters"
        )));
    }
    if let Some(c) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '-') {
        return Err(Error::manifest(format!(
            "name '{name}' contains invalid character '{c}'; only alphanumerics and hyphens are allowed"
        )));
    }
    Ok(())
}

/// Loads one manifest file, or every `*.toml` manifest in a directory.
///
/// # Errors
///
/// Returns [`Error::Manifest`] if the path does not exist or a directory holds
/// no manifests, and any error from [`SecretManifest::read`].
pub fn load_manifests(path: impl AsRef<Path>) -> Result<Vec<SecretManifest>> {
    let path = path.as_ref();
    if path.is_file() {
        return Ok(vec![SecretManifest::read(path)?]);
    }
    if !path.is_dir() {
        return Err(Error::manifest(format!(
            "manifest '{}' does not exist",
            path.display()
        )));
    }

    let entries = std::fs::read_dir(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file = entry.path();
        if file.is_file() && file.extension().is_some_and(|ext| ext == "toml") {
            files.push(file);
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(Error::manifest(format!(
            "directory '{}' contains no manifests",
            path.display()
        )));
    }

    files.iter().map(SecretManifest::read).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use test_case::test_case;

    const MINIMAL: &str = r#"
        [storageLocation]
        type = "memory"

        [secrets.session-key]
        type = "random-base64"
        parameters = { bytes = 16 }
    "#;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create file");
        file.write_all(content.as_bytes()).expect("write file");
        path
    }

    #[test]
    fn parses_minimal_manifest() {
        let manifest = SecretManifest::parse(MINIMAL).expect("valid manifest");
        assert_eq!(manifest.storage_location.type_name, "memory");
        assert!(manifest.storage_location.parameters.is_empty());
        let secret = &manifest.secrets["session-key"];
        assert_eq!(secret.type_name, "random-base64");
        assert_eq!(
            secret.parameters.get("bytes").and_then(toml::Value::as_integer),
            Some(16)
        );
    }

    #[test]
    fn parses_all_sections() {
        let manifest = SecretManifest::parse(
            r#"
            [storageLocation]
            type = "azure-key-vault"
            parameters = { name = "primary" }

            [references.github]
            type = "azure-key-vault"
            parameters = { name = "engineering" }

            [keys.signing]
            type = "RSA"
            size = 2048

            [secrets.conn]
            type = "azure-storage-connection-string"
            owner = "platform"
            description = "connection string"
            parameters = { account = "acct", storageKey = { name = "key" } }
            "#,
        )
        .expect("valid manifest");

        assert_eq!(manifest.references["github"].type_name, "azure-key-vault");
        assert_eq!(
            manifest.keys["signing"],
            KeySpec {
                key_type: KeyType::Rsa,
                size: 2048
            }
        );
        let conn = &manifest.secrets["conn"];
        assert_eq!(conn.owner.as_deref(), Some("platform"));
        assert!(conn.parameters["storageKey"].is_table());
    }

    #[test_case("" ; "empty document")]
    #[test_case("[secrets.a]\ntype = \"text\"" ; "missing storage location")]
    #[test_case("[storageLocation]\ntype = \"\"" ; "empty storage type")]
    #[test_case("[storageLocation]\ntype = \"memory\"\n[secrets.a]\nparameters = {}" ; "secret without type")]
    #[test_case("[storageLocation]\ntype = \"memory\"\n[secrets.\"bad_name\"]\ntype = \"text\"" ; "invalid secret name")]
    #[test_case("[storageLocation]\ntype = \"memory\"\n[keys.k]\ntype = \"DSA\"\nsize = 1" ; "unknown key type")]
    #[test_case("[storageLocation]\ntype = \"memory\"\n[keys.k]\ntype = \"RSA\"\nsize = 0" ; "zero key size")]
    #[test_case("[storageLocation]\ntype = \"memory\"\nsecrets = 5" ; "secrets not a table")]
    #[test_case("[storageLocation]\ntype = \"memory\"\n[unknown]\nx = 1" ; "unknown section")]
    fn rejects_malformed_manifests(text: &str) {
        let err = SecretManifest::parse(text).expect_err("should be rejected");
        assert!(matches!(err, Error::Manifest { .. }), "unexpected error: {err}");
    }

    #[test]
    fn read_merges_imported_secrets() {
        let dir = TempDir::new().expect("temp dir");
        write(
            &dir,
            "shared.toml",
            "[secrets.shared-token]\ntype = \"random-base64\"\n",
        );
        let path = write(
            &dir,
            "main.toml",
            "importSecretsFrom = [\"shared.toml\"]\n[storageLocation]\ntype = \"memory\"\n[secrets.own]\ntype = \"text\"\n",
        );

        let manifest = SecretManifest::read(&path).expect("valid manifest");
        assert!(manifest.secrets.contains_key("own"));
        assert!(manifest.secrets.contains_key("shared-token"));
        assert!(manifest.imports.is_empty());
        assert_eq!(manifest.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn read_rejects_duplicate_imported_secret() {
        let dir = TempDir::new().expect("temp dir");
        write(&dir, "shared.toml", "[secrets.own]\ntype = \"random-base64\"\n");
        let path = write(
            &dir,
            "main.toml",
            "importSecretsFrom = [\"shared.toml\"]\n[storageLocation]\ntype = \"memory\"\n[secrets.own]\ntype = \"text\"\n",
        );

        let err = SecretManifest::read(&path).expect_err("duplicate");
        assert!(err.to_string().contains("already defined"));
    }

    #[test]
    fn load_manifests_reads_directory_in_order() {
        let dir = TempDir::new().expect("temp dir");
        write(&dir, "b.toml", MINIMAL);
        write(&dir, "a.toml", MINIMAL);
        write(&dir, "notes.txt", "ignored");

        let manifests = load_manifests(dir.path()).expect("manifests");
        assert_eq!(manifests.len(), 2);
        let names: Vec<_> = manifests
            .iter()
            .filter_map(|m| m.path.as_ref()?.file_name()?.to_str().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["a.toml", "b.toml"]);
    }

    #[test]
    fn load_manifests_rejects_empty_directory() {
        let dir = TempDir::new().expect("temp dir");
        let err = load_manifests(dir.path()).expect_err("empty directory");
        assert!(err.to_string().contains("contains no manifests"));
    }

    #[test]
    fn load_manifests_rejects_missing_path() {
        let err = load_manifests("/definitely/not/here.toml").expect_err("missing");
        assert!(matches!(err, Error::Manifest { .. }));
    }
}
