//! Results of a synchronization run.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// What happened to one secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretOutcome {
    /// Nothing to do.
    Ok,
    /// Rotation is overdue but within the verify-only grace window.
    OkInGrace,
    /// At least one part was missing; rotated.
    New,
    /// Rotation was forced; rotated.
    Forced,
    /// A referenced secret was rotated in this run; rotated.
    Cascade,
    /// The value had expired; rotated.
    Expired,
    /// The rotation date had passed; rotated.
    Scheduled,
    /// Verify-only mode found a secret needing rotation.
    VerificationFailed,
}

impl SecretOutcome {
    /// True if the secret was rotated.
    #[must_use]
    pub fn is_rotation(self) -> bool {
        matches!(
            self,
            Self::New | Self::Forced | Self::Cascade | Self::Expired | Self::Scheduled
        )
    }

    /// True for outcomes that fail the run.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::VerificationFailed)
    }

    /// Status icon for tables.
    #[must_use]
    pub fn icon(self) -> &'static str {
        match self {
            Self::Ok => "✔",
            Self::OkInGrace => "⚠",
            Self::New | Self::Forced | Self::Cascade | Self::Expired | Self::Scheduled => "↻",
            Self::VerificationFailed => "✘",
        }
    }

    /// Summary bucket: `OK`, `Rotated` or `Failed`.
    #[must_use]
    pub fn bucket(self) -> &'static str {
        if self.is_failure() {
            "Failed"
        } else if self.is_rotation() {
            "Rotated"
        } else {
            "OK"
        }
    }
}

impl fmt::Display for SecretOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "OK",
            Self::OkInGrace => "OK (rotation overdue, within grace period)",
            Self::New => "New secret",
            Self::Forced => "Forced",
            Self::Cascade => "Cascade",
            Self::Expired => "Expired",
            Self::Scheduled => "Scheduled rotation",
            Self::VerificationFailed => "Verification failed",
        };
        f.write_str(text)
    }
}

/// Outcome for one manifest secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretReport {
    /// Secret name (without composite suffixes).
    pub name: String,
    /// Secret type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// What happened.
    pub outcome: SecretOutcome,
    /// Extra detail, e.g. why verification failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SecretReport {
    /// Human-readable status, with detail when present.
    #[must_use]
    pub fn status(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{} ({detail})", self.outcome),
            None => self.outcome.to_string(),
        }
    }
}

/// A soft anomaly that did not stop the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    /// The secret (or requested name) concerned.
    pub secret: String,
    /// What is wrong.
    pub message: String,
}

/// Everything a run did and found for one manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Manifest the run processed.
    pub manifest: String,
    /// Whether the run only verified.
    pub verify_only: bool,
    /// Per-secret outcomes in processing order.
    pub secrets: Vec<SecretReport>,
    /// Soft problems, in the order found.
    pub problems: Vec<Problem>,
    /// Stored names the manifest does not mention.
    pub extra_secrets: Vec<String>,
    /// Keys checked or created.
    pub ensured_keys: Vec<String>,
}

impl SyncReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(manifest: impl Into<String>, verify_only: bool) -> Self {
        Self {
            manifest: manifest.into(),
            verify_only,
            ..Self::default()
        }
    }

    /// Records an outcome.
    pub fn record(
        &mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        outcome: SecretOutcome,
        detail: Option<String>,
    ) {
        self.secrets.push(SecretReport {
            name: name.into(),
            type_name: type_name.into(),
            outcome,
            detail,
        });
    }

    /// Records a soft problem.
    pub fn problem(&mut self, secret: impl Into<String>, message: impl Into<String>) {
        let problem = Problem {
            secret: secret.into(),
            message: message.into(),
        };
        tracing::warn!(secret = %problem.secret, problem = %problem.message, "problem detected");
        self.problems.push(problem);
    }

    /// Outcome recorded for `name`, if any.
    #[must_use]
    pub fn outcome_of(&self, name: &str) -> Option<SecretOutcome> {
        self.secrets.iter().find(|s| s.name == name).map(|s| s.outcome)
    }

    /// Secrets rotated in this run.
    pub fn rotated(&self) -> impl Iterator<Item = &SecretReport> {
        self.secrets.iter().filter(|s| s.outcome.is_rotation())
    }

    /// Secrets that failed verification.
    pub fn failures(&self) -> impl Iterator<Item = &SecretReport> {
        self.secrets.iter().filter(|s| s.outcome.is_failure())
    }

    /// True if no secret failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Problems grouped by secret.
    #[must_use]
    pub fn problems_by_secret(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for problem in &self.problems {
            grouped
                .entry(problem.secret.as_str())
                .or_default()
                .push(problem.message.as_str());
        }
        grouped
    }

    /// Counts per summary bucket.
    #[must_use]
    pub fn bucket_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for secret in &self.secrets {
            *counts.entry(secret.outcome.bucket()).or_insert(0) += 1;
        }
        counts
    }
}
