//! The synchronization engine.
//!
//! For each manifest secret, in dependency order, the engine decides whether
//! to rotate, asks the bound secret type for new values and writes them with
//! the engine's tags. Secrets are processed one at a time: a cascading
//! rotation depends on every referenced secret having been handled first.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::RotationContext;
use crate::error::{Error, Result};
use crate::manifest::{SecretManifest, SecretSpec};
use crate::report::{SecretOutcome, SyncReport};
use crate::resolver::{SecretNode, order_secrets};
use crate::secret_types::{BoundSecret, SecretTypeRegistry};
use crate::services::Services;
use crate::storage::{StorageLocation, StorageLocationRegistry};
use crate::types::{
    CHANGED_BY_TAG, NEXT_ROTATION_ON_TAG, OWNER_TAG, RotationSchedule, SECRET_TYPE_TAG,
    SecretProperties, SecretValue,
};

/// Overdue rotations this recent still pass verification.
pub const VERIFY_GRACE_DAYS: i64 = 7;

/// Switches for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynchronizeOptions {
    /// Rotate every secret.
    pub force: bool,
    /// Rotate these secrets.
    pub force_secrets: BTreeSet<String>,
    /// Report what would rotate as failures; never write.
    pub verify_only: bool,
}

/// What is stored for a secret's parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct StoredState {
    any_missing: bool,
    next_rotation: Option<DateTime<Utc>>,
    expires: Option<DateTime<Utc>>,
}

/// Why a secret would be rotated this run, beyond its stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Triggers {
    force: bool,
    forced_by_name: bool,
    cascade: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Keep(SecretOutcome),
    Rotate(SecretOutcome),
}

/// First matching rule wins.
fn decide(state: StoredState, triggers: Triggers, now: DateTime<Utc>, verify_only: bool) -> Decision {
    if state.any_missing {
        return Decision::Rotate(SecretOutcome::New);
    }
    if triggers.force || triggers.forced_by_name {
        return Decision::Rotate(SecretOutcome::Forced);
    }
    if triggers.cascade {
        return Decision::Rotate(SecretOutcome::Cascade);
    }
    if state.expires.is_some_and(|expires| expires <= now) {
        return Decision::Rotate(SecretOutcome::Expired);
    }
    match state.next_rotation {
        Some(next) if next <= now => {
            if verify_only && next > now - Duration::days(VERIFY_GRACE_DAYS) {
                Decision::Keep(SecretOutcome::OkInGrace)
            } else {
                Decision::Rotate(SecretOutcome::Scheduled)
            }
        }
        _ => Decision::Keep(SecretOutcome::Ok),
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Reads the stored parts of a secret, noting tag anomalies as problems.
fn assess(name: &str, parts: &[(String, Option<&SecretProperties>)], report: &mut SyncReport) -> StoredState {
    let mut state = StoredState::default();
    for (part, properties) in parts {
        let Some(properties) = properties else {
            state.any_missing = true;
            continue;
        };
        match properties.rotation_schedule() {
            RotationSchedule::At(next) => {
                state.next_rotation = Some(state.next_rotation.map_or(next, |n| n.min(next)));
            }
            RotationSchedule::Missing => {
                report.problem(name, format!("'{part}' has no {NEXT_ROTATION_ON_TAG} tag"));
            }
            RotationSchedule::Invalid(raw) => report.problem(
                name,
                format!("'{part}' has an unparseable {NEXT_ROTATION_ON_TAG} tag '{raw}'"),
            ),
        }
        if let Some(expires) = properties.expires_on {
            state.expires = Some(state.expires.map_or(expires, |e| e.min(expires)));
        }
    }
    state
}

/// Storage locations a manifest uses.
struct Locations {
    primary: Arc<dyn StorageLocation>,
    references: BTreeMap<String, Arc<dyn StorageLocation>>,
}

/// Drives rotation for manifests.
pub struct Synchronizer {
    secret_types: SecretTypeRegistry,
    storage_types: StorageLocationRegistry,
    services: Services,
}

impl Synchronizer {
    /// Creates an engine with explicit registries.
    #[must_use]
    pub fn new(
        secret_types: SecretTypeRegistry,
        storage_types: StorageLocationRegistry,
        services: Services,
    ) -> Self {
        Self {
            secret_types,
            storage_types,
            services,
        }
    }

    /// Creates an engine with every built-in secret type and storage location.
    #[must_use]
    pub fn with_defaults(services: Services) -> Self {
        Self::new(
            SecretTypeRegistry::with_defaults(&services),
            StorageLocationRegistry::with_defaults(),
            services,
        )
    }

    /// The shared services.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Synchronizes one manifest and returns the report.
    ///
    /// # Errors
    ///
    /// See [`Self::synchronize_into`]; the partial report is discarded.
    pub async fn synchronize(
        &self,
        manifest: &SecretManifest,
        options: &SynchronizeOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::new(manifest.display_name(), options.verify_only);
        self.synchronize_into(manifest, options, cancel, &mut report)
            .await?;
        Ok(report)
    }

    /// Synchronizes one manifest, recording outcomes into `report` as they happen.
    ///
    /// On error `report` holds everything decided before the failure.
    ///
    /// # Errors
    ///
    /// Configuration errors (unknown types, bad parameters, reference cycles)
    /// are returned before anything is read or written. During the run,
    /// [`Error::HumanInterventionRequired`], [`Error::Cancelled`] and any
    /// storage or secret type failure abort the run.
    pub async fn synchronize_into(
        &self,
        manifest: &SecretManifest,
        options: &SynchronizeOptions,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<()> {
        let locations = self.create_locations(manifest)?;

        let mut bound: BTreeMap<&str, Arc<dyn BoundSecret>> = BTreeMap::new();
        for (name, spec) in &manifest.secrets {
            bound.insert(name.as_str(), self.secret_types.bind(name, spec)?);
        }

        for name in &options.force_secrets {
            if !bound.contains_key(name.as_str()) {
                report.problem(name, "requested with --force-secret but not in the manifest");
            }
        }

        let nodes = Self::dependency_nodes(manifest, &bound, report);
        let ordered = order_secrets(&nodes)?;

        check_cancelled(cancel)?;
        let existing: BTreeMap<String, SecretProperties> = locations
            .primary
            .list_secrets()
            .await?
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();

        info!(
            manifest = %report.manifest,
            storage = %locations.primary.label(),
            secrets = ordered.len(),
            verify_only = options.verify_only,
            "synchronizing"
        );

        let mut regenerated: BTreeSet<String> = BTreeSet::new();
        let mut managed: BTreeSet<String> = BTreeSet::new();
        for entry in &ordered {
            check_cancelled(cancel)?;
            let name = entry.name.as_str();
            let (Some(secret), Some(spec)) = (bound.get(name), manifest.secrets.get(name)) else {
                continue;
            };

            let parts: Vec<(String, Option<&SecretProperties>)> = secret
                .composite_suffixes()
                .iter()
                .map(|suffix| {
                    let part = format!("{name}{suffix}");
                    let stored = existing.get(&part);
                    (part, stored)
                })
                .collect();
            managed.extend(parts.iter().map(|(part, _)| part.clone()));

            let state = assess(name, &parts, report);
            let triggers = Triggers {
                force: options.force,
                forced_by_name: options.force_secrets.contains(name),
                cascade: entry.references.iter().any(|r| regenerated.contains(r)),
            };
            let now = self.services.clock.now();

            match decide(state, triggers, now, options.verify_only) {
                Decision::Keep(outcome) => {
                    report.record(name, &spec.type_name, outcome, None);
                }
                Decision::Rotate(reason) if options.verify_only => {
                    warn!(secret = %name, reason = %reason, "secret needs rotation");
                    report.record(
                        name,
                        &spec.type_name,
                        SecretOutcome::VerificationFailed,
                        Some(reason.to_string()),
                    );
                }
                Decision::Rotate(reason) => {
                    info!(secret = %name, reason = %reason, "rotating secret");
                    if let Err(e) = self
                        .rotate(name, spec, secret.as_ref(), &parts, &locations, cancel)
                        .await
                    {
                        error!(secret = %name, error = %e, "rotation failed");
                        return Err(e);
                    }
                    regenerated.insert(name.to_string());
                    report.record(name, &spec.type_name, reason, None);
                }
            }
        }

        if !options.verify_only {
            for (name, key) in &manifest.keys {
                check_cancelled(cancel)?;
                locations.primary.ensure_key(name, key).await?;
                report.ensured_keys.push(name.clone());
            }
            for name in existing.keys() {
                if !managed.contains(name) && !manifest.keys.contains_key(name) {
                    warn!(secret = %name, "extra secret in storage, consider deleting it");
                    report.extra_secrets.push(name.clone());
                }
            }
        }

        let counts = report.bucket_counts();
        info!(
            manifest = %report.manifest,
            rotated = counts.get("Rotated").copied().unwrap_or(0),
            ok = counts.get("OK").copied().unwrap_or(0),
            failed = counts.get("Failed").copied().unwrap_or(0),
            problems = report.problems.len(),
            "synchronization finished"
        );
        Ok(())
    }

    fn create_locations(&self, manifest: &SecretManifest) -> Result<Locations> {
        let primary = self
            .storage_types
            .create(&manifest.storage_location, &self.services)?;
        let mut references = BTreeMap::new();
        for (name, spec) in &manifest.references {
            references.insert(name.clone(), self.storage_types.create(spec, &self.services)?);
        }
        Ok(Locations {
            primary,
            references,
        })
    }

    /// Local references between manifest secrets; anything else becomes a problem.
    fn dependency_nodes(
        manifest: &SecretManifest,
        bound: &BTreeMap<&str, Arc<dyn BoundSecret>>,
        report: &mut SyncReport,
    ) -> Vec<SecretNode> {
        let mut nodes = Vec::with_capacity(bound.len());
        for (name, secret) in bound {
            let mut references = BTreeSet::new();
            for reference in secret.secret_references() {
                match &reference.location {
                    Some(location) => {
                        if !manifest.references.contains_key(location) {
                            report.problem(
                                *name,
                                format!("references '{reference}' in unknown location '{location}'"),
                            );
                        }
                    }
                    None if reference.name == *name => {}
                    None if !bound.contains_key(reference.name.as_str()) => {
                        report.problem(
                            *name,
                            format!("references '{}', which is not in the manifest", reference.name),
                        );
                    }
                    None => {
                        references.insert(reference.name);
                    }
                }
            }
            nodes.push(SecretNode {
                name: (*name).to_string(),
                references,
            });
        }
        nodes
    }

    async fn rotate(
        &self,
        name: &str,
        spec: &SecretSpec,
        secret: &dyn BoundSecret,
        parts: &[(String, Option<&SecretProperties>)],
        locations: &Locations,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut seed = BTreeMap::new();
        for (part, stored) in parts {
            if stored.is_none() {
                continue;
            }
            check_cancelled(cancel)?;
            if let Some(current) = locations.primary.get_secret_value(part).await? {
                seed = current.tags;
                break;
            }
        }

        let mut context = RotationContext::new(
            name,
            seed,
            locations.primary.clone(),
            locations.references.clone(),
            self.services.clock.clone(),
            self.services.console.clone(),
            cancel.clone(),
        );
        check_cancelled(cancel)?;
        let values = secret.rotate_values(&mut context).await?;
        if values.len() != parts.len() {
            return Err(Error::SecretTypeContract {
                type_name: spec.type_name.clone(),
                secret: name.to_string(),
                reason: format!("returned {} values for {} parts", values.len(), parts.len()),
            });
        }

        let mut tags = context.into_values();
        tags.insert(SECRET_TYPE_TAG.to_string(), spec.type_name.clone());
        tags.insert(CHANGED_BY_TAG.to_string(), self.services.identity.clone());
        if let Some(owner) = &spec.owner {
            tags.insert(OWNER_TAG.to_string(), owner.clone());
        }

        // values may already be live outside the store; persist every part
        for ((part, _), data) in parts.iter().zip(values) {
            let value = SecretValue::new(data.value())
                .with_tags(tags.clone())
                .with_expires_on(data.expires_on)
                .with_next_rotation_on(data.next_rotation_on);
            locations.primary.set_secret_value(part, &value).await?;
            info!(secret = %name, part = %part, next_rotation_on = %data.next_rotation_on, "stored new value");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("secret_types", &self.secret_types)
            .field("storage_types", &self.storage_types)
            .finish_non_exhaustive()
    }
}
