//! Core value types shared by the engine, secret types and storage locations.
//!
//! - [`SecretProperties`]: what a store knows about a secret without its value
//! - [`SecretValue`]: a stored value plus tags and schedule, zeroized on drop
//! - [`SecretData`]: what a secret type produces for one stored name
//! - [`SecretReference`]: a parameter pointing at another secret

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Tag holding the instant after which a secret is due for rotation.
pub const NEXT_ROTATION_ON_TAG: &str = "next-rotation-on";
/// Tag naming the identity that last wrote the secret.
pub const CHANGED_BY_TAG: &str = "ChangedBy";
/// Tag naming the owner declared in the manifest.
pub const OWNER_TAG: &str = "Owner";
/// Tag naming the secret type that produced the value.
pub const SECRET_TYPE_TAG: &str = "SecretType";

/// Tags written by the engine itself; everything else belongs to the secret type.
pub const ENGINE_TAGS: [&str; 4] = [NEXT_ROTATION_ON_TAG, CHANGED_BY_TAG, OWNER_TAG, SECRET_TYPE_TAG];

/// Formats an instant the way it is stored in tags.
#[must_use]
pub fn format_tag_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a tag timestamp, accepting RFC 3339 or a bare `YYYY-MM-DD` date.
#[must_use]
pub fn parse_tag_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// State of the `next-rotation-on` tag on a stored secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationSchedule {
    /// The tag is present and parses.
    At(DateTime<Utc>),
    /// The tag is absent.
    Missing,
    /// The tag is present but unparseable.
    Invalid(String),
}

/// Properties of a stored secret, as returned by listing a store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecretProperties {
    /// The stored name.
    pub name: String,
    /// When the value stops being usable, if ever.
    pub expires_on: Option<DateTime<Utc>>,
    /// Metadata tags.
    pub tags: BTreeMap<String, String>,
}

impl SecretProperties {
    /// Creates properties with no expiry and no tags.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expires_on: None,
            tags: BTreeMap::new(),
        }
    }

    /// Reads the rotation schedule from the tags.
    #[must_use]
    pub fn rotation_schedule(&self) -> RotationSchedule {
        match self.tags.get(NEXT_ROTATION_ON_TAG) {
            None => RotationSchedule::Missing,
            Some(raw) => parse_tag_time(raw)
                .map_or_else(|| RotationSchedule::Invalid(raw.clone()), RotationSchedule::At),
        }
    }
}

/// A secret value with its metadata.
///
/// The plaintext is zeroized when the value is dropped and never shown by `Debug`.
#[derive(Clone)]
pub struct SecretValue {
    value: Zeroizing<String>,
    /// Metadata tags to persist alongside the value.
    pub tags: BTreeMap<String, String>,
    /// When the value stops being usable, if ever.
    pub expires_on: Option<DateTime<Utc>>,
    /// When the value is due for rotation.
    pub next_rotation_on: Option<DateTime<Utc>>,
}

impl SecretValue {
    /// Creates a value with no metadata.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Zeroizing::new(value.into()),
            tags: BTreeMap::new(),
            expires_on: None,
            next_rotation_on: None,
        }
    }

    /// Rebuilds a value read back from a store, taking the schedule from its tags.
    #[must_use]
    pub fn from_stored(
        value: impl Into<String>,
        expires_on: Option<DateTime<Utc>>,
        tags: BTreeMap<String, String>,
    ) -> Self {
        let next_rotation_on = tags.get(NEXT_ROTATION_ON_TAG).and_then(|raw| parse_tag_time(raw));
        Self {
            value: Zeroizing::new(value.into()),
            tags,
            expires_on,
            next_rotation_on,
        }
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the expiry.
    #[must_use]
    pub fn with_expires_on(mut self, expires_on: Option<DateTime<Utc>>) -> Self {
        self.expires_on = expires_on;
        self
    }

    /// Sets the next rotation instant.
    #[must_use]
    pub fn with_next_rotation_on(mut self, next_rotation_on: DateTime<Utc>) -> Self {
        self.next_rotation_on = Some(next_rotation_on);
        self
    }

    /// Returns the plaintext.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the tags with `next-rotation-on` filled in from [`Self::next_rotation_on`].
    #[must_use]
    pub fn tags_for_storage(&self) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        if let Some(next) = self.next_rotation_on {
            tags.insert(NEXT_ROTATION_ON_TAG.to_string(), format_tag_time(next));
        }
        tags
    }

    /// Builds the properties a store reports for this value under `name`.
    #[must_use]
    pub fn properties(&self, name: impl Into<String>) -> SecretProperties {
        SecretProperties {
            name: name.into(),
            expires_on: self.expires_on,
            tags: self.tags_for_storage(),
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("value", &"[REDACTED]")
            .field("tags", &self.tags)
            .field("expires_on", &self.expires_on)
            .field("next_rotation_on", &self.next_rotation_on)
            .finish()
    }
}

/// A freshly generated value for one stored name.
#[derive(Clone)]
pub struct SecretData {
    value: Zeroizing<String>,
    /// When the value stops being usable, if ever.
    pub expires_on: Option<DateTime<Utc>>,
    /// When the value should next be rotated.
    pub next_rotation_on: DateTime<Utc>,
}

impl SecretData {
    /// Creates generated data.
    #[must_use]
    pub fn new(
        value: impl Into<String>,
        expires_on: Option<DateTime<Utc>>,
        next_rotation_on: DateTime<Utc>,
    ) -> Self {
        Self {
            value: Zeroizing::new(value.into()),
            expires_on,
            next_rotation_on,
        }
    }

    /// Returns the plaintext.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for SecretData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretData")
            .field("value", &"[REDACTED]")
            .field("expires_on", &self.expires_on)
            .field("next_rotation_on", &self.next_rotation_on)
            .finish()
    }
}

/// A parameter that points at another secret.
///
/// Without a `location` the secret lives in the manifest's own storage
/// location and participates in rotation ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretReference {
    /// Name of the referenced secret.
    pub name: String,
    /// Name of a `references` entry holding the secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl SecretReference {
    /// References a secret in the primary storage location.
    #[must_use]
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
        }
    }

    /// Returns true if the reference targets the primary storage location.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.location.is_none()
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
