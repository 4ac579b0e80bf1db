//! The `synchronize` command.
//!
//! Loads one manifest or a directory of them and runs the engine over each in
//! turn. The summary is printed even when a run aborts, so an operator can see
//! what was rotated before the failure.

use std::io::Write;
use std::sync::Arc;

use secret_manager::azure::ClientSecretCredential;
use secret_manager::{
    NonInteractiveConsole, Services, SyncReport, SynchronizeOptions, Synchronizer, SystemClock,
    TerminalConsole, load_manifests,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::{CredentialArgs, SynchronizeArgs};
use crate::error::CliError;
use crate::output::{OutputFormat, SyncSummary};

/// Builds the process-wide services from command-line arguments.
///
/// # Errors
///
/// Returns [`CliError::InvalidArgument`] if the service principal settings
/// are only partly given.
pub fn build_services(args: &SynchronizeArgs) -> Result<Services, CliError> {
    let http = reqwest::Client::new();
    let clock = Arc::new(SystemClock);
    let mut builder = Services::builder()
        .http(http.clone())
        .clock(clock.clone())
        .devops_token(args.credentials.devops_token.clone());

    if let Some((tenant, client, secret)) = service_principal(&args.credentials)? {
        let authority = secret_manager::azure::AzureEndpoints::default().authority;
        builder = builder.credential(Arc::new(ClientSecretCredential::new(
            http, authority, tenant, client, secret, clock,
        )));
    }

    builder = if args.non_interactive {
        builder.console(Arc::new(NonInteractiveConsole))
    } else {
        builder.console(Arc::new(TerminalConsole))
    };

    if let Some(identity) = args.changed_by.clone().or_else(default_identity) {
        builder = builder.identity(identity);
    }
    Ok(builder.build())
}

fn service_principal(
    credentials: &CredentialArgs,
) -> Result<Option<(String, String, String)>, CliError> {
    match (
        &credentials.tenant_id,
        &credentials.client_id,
        &credentials.client_secret,
    ) {
        (Some(tenant), Some(client), Some(secret)) => {
            Ok(Some((tenant.clone(), client.clone(), secret.clone())))
        }
        (None, None, None) => Ok(None),
        _ => Err(CliError::InvalidArgument(
            "AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET must be set together".into(),
        )),
    }
}

fn default_identity() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|user| !user.is_empty())
}

/// Handler for the synchronize command.
pub struct SynchronizeCommand {
    synchronizer: Synchronizer,
}

impl SynchronizeCommand {
    /// Creates a handler using every built-in secret type and storage location.
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self::with_synchronizer(Synchronizer::with_defaults(services))
    }

    /// Creates a handler around a configured engine.
    #[must_use]
    pub fn with_synchronizer(synchronizer: Synchronizer) -> Self {
        Self { synchronizer }
    }

    /// Executes the command, writing the summary to `out`.
    ///
    /// # Errors
    ///
    /// Returns the first error that aborted a manifest, or
    /// [`CliError::VerificationFailed`] if verify-only found work to do.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &SynchronizeArgs,
        cancel: &CancellationToken,
    ) -> Result<(), CliError> {
        let manifests = load_manifests(&args.manifest)?;
        let options = SynchronizeOptions {
            force: args.force,
            force_secrets: args.force_secrets.iter().cloned().collect(),
            verify_only: args.verify_only,
        };

        let mut summary = SyncSummary::default();
        let mut outcome = Ok(());
        for manifest in &manifests {
            let mut report = SyncReport::new(manifest.display_name(), options.verify_only);
            let result = self
                .synchronizer
                .synchronize_into(manifest, &options, cancel, &mut report)
                .await;
            summary.reports.push(report);
            if let Err(e) = result {
                error!(manifest = %manifest.display_name(), error = %e, "synchronization aborted");
                summary.aborted = Some(e.to_string());
                outcome = Err(CliError::from(e));
                break;
            }
        }

        format.write(out, &summary)?;
        outcome?;

        let failures = summary.failure_count();
        if failures > 0 {
            return Err(CliError::VerificationFailed { count: failures });
        }
        info!(manifests = manifests.len(), "all manifests synchronized");
        Ok(())
    }
}

impl std::fmt::Debug for SynchronizeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizeCommand")
            .field("synchronizer", &self.synchronizer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands, Format};
    use crate::error::{EXIT_HUMAN_INTERVENTION, EXIT_VALIDATION};
    use clap::Parser;

    fn args(extra: &[&str]) -> SynchronizeArgs {
        let mut argv = vec!["secret-manager", "synchronize"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Synchronize(args) => args,
        }
    }

    fn write_manifest(dir: &tempfile::TempDir, store: &str, secrets: &str) -> std::path::PathBuf {
        let path = dir.path().join("secrets.toml");
        let text = format!(
            "[storageLocation]\ntype = \"file\"\nparameters = {{ path = {store:?} }}\n{secrets}"
        );
        std::fs::write(&path, text).expect("write manifest");
        path
    }

    async fn run(args: &SynchronizeArgs) -> (Result<(), CliError>, String) {
        let command = SynchronizeCommand::new(Services::builder().identity("test").build());
        let mut out = Vec::new();
        let result = command
            .execute(
                &mut out,
                &OutputFormat::new(Format::Table),
                args,
                &CancellationToken::new(),
            )
            .await;
        (result, String::from_utf8(out).expect("utf8"))
    }

    #[test]
    fn partial_service_principal_is_rejected() {
        let mut partial = CredentialArgs {
            tenant_id: Some("tenant".into()),
            ..CredentialArgs::default()
        };
        assert!(service_principal(&partial).is_err());

        partial.client_id = Some("client".into());
        partial.client_secret = Some("secret".into());
        assert!(service_principal(&partial).expect("complete").is_some());
        assert!(service_principal(&CredentialArgs::default()).expect("empty").is_none());
    }

    #[tokio::test]
    async fn synchronizes_then_verifies_a_file_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = dir.path().join("store.json");
        let manifest = write_manifest(
            &dir,
            &store.display().to_string(),
            "[secrets.api-token]\ntype = \"random-base64\"\n",
        );
        let path = manifest.display().to_string();

        let (result, output) = run(&args(&[path.as_str()])).await;
        result.expect("first run");
        assert!(output.contains("New secret"));
        assert!(store.exists());

        let (result, output) = run(&args(&[path.as_str(), "--verify-only"])).await;
        result.expect("verify");
        assert!(output.contains("(verify only)"));
        assert!(output.contains("api-token"));
    }

    #[tokio::test]
    async fn verify_only_on_empty_store_fails_validation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = dir.path().join("store.json");
        let manifest = write_manifest(
            &dir,
            &store.display().to_string(),
            "[secrets.api-token]\ntype = \"random-base64\"\n",
        );

        let path = manifest.display().to_string();
        let (result, output) = run(&args(&[path.as_str(), "--verify-only"])).await;
        let err = result.expect_err("needs rotation");
        assert_eq!(err.exit_code(), EXIT_VALIDATION);
        assert!(output.contains("Verification failed (New secret)"));
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn operator_secret_prints_partial_summary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = dir.path().join("store.json");
        let manifest = write_manifest(
            &dir,
            &store.display().to_string(),
            "[secrets.a-token]\ntype = \"random-base64\"\n[secrets.b-password]\ntype = \"text\"\n",
        );

        let path = manifest.display().to_string();
        let (result, output) = run(&args(&[path.as_str(), "--non-interactive"])).await;
        let err = result.expect_err("operator needed");
        assert_eq!(err.exit_code(), EXIT_HUMAN_INTERVENTION);
        assert!(output.contains("a-token"));
        assert!(output.contains("Run aborted"));
    }

    #[tokio::test]
    async fn missing_manifest_is_a_validation_error() {
        let (result, output) = run(&args(&["/definitely/not/here.toml"])).await;
        assert_eq!(result.expect_err("missing").exit_code(), EXIT_VALIDATION);
        assert!(output.is_empty());
    }
}
