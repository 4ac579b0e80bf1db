//! Error types for secret synchronization.

use thiserror::Error;

/// Broad classification of an [`Error`], used to pick how a run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed manifest, missing files, unknown types, unresolvable ordering.
    Configuration,
    /// A secret type cannot rotate without an operator.
    HumanIntervention,
    /// Backend or network failure that survived the backend's own retries.
    Transient,
    /// Anything else.
    Unexpected,
}

/// Errors that can occur while loading manifests or synchronizing secrets.
#[derive(Debug, Error)]
pub enum Error {
    /// The manifest could not be read, parsed or validated.
    #[error("manifest error: {reason}")]
    Manifest {
        /// What was wrong with the manifest.
        reason: String,
    },

    /// Reading or writing a local file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The file involved.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A secret references a type that is not registered.
    #[error("secret '{secret}' has unknown type '{type_name}'")]
    UnknownSecretType {
        /// The secret declaring the type.
        secret: String,
        /// The unregistered type name.
        type_name: String,
    },

    /// A storage location references a type that is not registered.
    #[error("unknown storage location type '{type_name}'")]
    UnknownStorageType {
        /// The unregistered type name.
        type_name: String,
    },

    /// Parameters could not be bound to the type's parameter struct.
    #[error("invalid parameters for '{name}': {reason}")]
    InvalidParameters {
        /// The secret or storage location being bound.
        name: String,
        /// Why binding failed.
        reason: String,
    },

    /// Secrets whose references can never be satisfied (a cycle).
    #[error("unresolved secret references: {}", names.join(", "))]
    UnresolvedReferences {
        /// The secrets that could not be ordered.
        names: Vec<String>,
    },

    /// Rotation requires an operator to act.
    #[error("human intervention required for '{secret}': {reason}")]
    HumanInterventionRequired {
        /// The secret that needs attention.
        secret: String,
        /// What the operator has to do.
        reason: String,
    },

    /// A storage backend rejected an operation.
    #[error("storage error: {reason}")]
    Storage {
        /// The reason the operation failed.
        reason: String,
    },

    /// A conditional update kept losing to concurrent writers.
    #[error("conflicting update to '{name}' after {attempts} attempts")]
    Conflict {
        /// The secret being written.
        name: String,
        /// How many attempts were made.
        attempts: u32,
    },

    /// An HTTP call failed.
    #[error("HTTP error: {reason}")]
    Http {
        /// Status or transport failure description.
        reason: String,
        /// Whether the failure is worth retrying.
        retryable: bool,
    },

    /// Acquiring an access token failed.
    #[error("credential error: {reason}")]
    Credential {
        /// Why the token could not be acquired.
        reason: String,
    },

    /// A secret type broke its contract with the engine.
    #[error("secret type '{type_name}' misbehaved rotating '{secret}': {reason}")]
    SecretTypeContract {
        /// The registered type name.
        type_name: String,
        /// The secret being rotated.
        secret: String,
        /// What the type did wrong.
        reason: String,
    },

    /// The run was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Serialization or deserialization failed.
    #[error("serialization error: {reason}")]
    Serialization {
        /// The reason serialization failed.
        reason: String,
    },
}

impl Error {
    /// Creates a manifest error.
    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::Manifest {
            reason: reason.into(),
        }
    }

    /// Creates a storage error.
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }

    /// Creates a human-intervention error for a secret.
    pub fn human_intervention(secret: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HumanInterventionRequired {
            secret: secret.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-parameters error.
    pub fn invalid_parameters(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Classifies this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Manifest { .. }
            | Self::Io { .. }
            | Self::UnknownSecretType { .. }
            | Self::UnknownStorageType { .. }
            | Self::InvalidParameters { .. }
            | Self::UnresolvedReferences { .. } => ErrorKind::Configuration,
            Self::HumanInterventionRequired { .. } => ErrorKind::HumanIntervention,
            Self::Conflict { .. } | Self::Http { .. } | Self::Credential { .. } => {
                ErrorKind::Transient
            }
            Self::Storage { .. }
            | Self::SecretTypeContract { .. }
            | Self::Cancelled
            | Self::Serialization { .. } => ErrorKind::Unexpected,
        }
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http { retryable: true, .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err.is_timeout() || err.is_connect() || err.is_request();
        Self::Http {
            reason: err.to_string(),
            retryable,
        }
    }
}

/// Result type alias for secret manager operations.
pub type Result<T> = std::result::Result<T, Error>;
