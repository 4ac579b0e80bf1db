//! # Secret Manager
//!
//! Keeps secrets described by a manifest present and fresh in a storage
//! location:
//!
//! - **Manifests**: TOML documents naming a storage location, keys and secrets
//! - **Secret types**: pluggable generators, from random bytes to Azure
//!   storage keys and operator-entered text
//! - **Storage locations**: Azure Key Vault, Azure DevOps service connections,
//!   a JSON file and an in-memory store
//! - **Dependency ordering**: secrets that read other secrets rotate after
//!   them, and rotate again whenever they do
//! - **Verification**: a read-only mode that reports what would rotate
//!
//! ## Example
//!
//! ```rust,no_run
//! use secret_manager::{SecretManifest, Services, SynchronizeOptions, Synchronizer};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> secret_manager::Result<()> {
//! let manifest = SecretManifest::read("secrets.toml")?;
//! let synchronizer = Synchronizer::with_defaults(Services::builder().build());
//! let report = synchronizer
//!     .synchronize(&manifest, &SynchronizeOptions::default(), &CancellationToken::new())
//!     .await?;
//! println!("{} secrets rotated", report.rotated().count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Considerations
//!
//! - Secret plaintext is held in `zeroize`-on-drop buffers
//! - Debug output for secrets and credentials is redacted
//! - Every storage write is recorded through an [`AuditLogger`]

pub mod audit;
pub mod azure;
pub mod clock;
pub mod console;
pub mod context;
pub mod error;
pub mod magic;
pub mod manifest;
pub mod report;
pub mod resolver;
pub mod secret_types;
pub mod services;
pub mod storage;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use error::{Error, ErrorKind, Result};
pub use types::{
    CHANGED_BY_TAG, NEXT_ROTATION_ON_TAG, OWNER_TAG, SECRET_TYPE_TAG, SecretData,
    SecretProperties, SecretReference, SecretValue,
};

pub use manifest::{KeySpec, KeyType, SecretManifest, SecretSpec, StorageLocationSpec, load_manifests};

pub use audit::{AuditLogger, AuditRecord, AuditResult, TracingAuditLogger};
pub use clock::{Clock, FixedClock, SystemClock};
pub use console::{Console, NonInteractiveConsole, TerminalConsole};
pub use context::RotationContext;
pub use services::{Services, ServicesBuilder};

pub use secret_types::{BoundSecret, SecretType, SecretTypeRegistry};
pub use storage::{StorageLocation, StorageLocationFactory, StorageLocationRegistry};

pub use report::{Problem, SecretOutcome, SecretReport, SyncReport};
pub use sync::{SynchronizeOptions, Synchronizer};
