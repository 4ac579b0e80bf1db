//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Keeps manifest-described secrets present and rotated.
#[derive(Parser, Debug, Clone)]
#[command(name = "secret-manager")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Log line format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Rotate secrets that are missing, due or forced, and ensure keys exist.
    Synchronize(SynchronizeArgs),
}

/// Arguments for the synchronize command.
#[derive(Args, Debug, Clone)]
pub struct SynchronizeArgs {
    /// Manifest file, or a directory of `*.toml` manifests.
    pub manifest: PathBuf,

    /// Rotate every secret regardless of schedule.
    #[arg(long, conflicts_with = "verify_only")]
    pub force: bool,

    /// Rotate the named secret regardless of schedule (repeatable).
    #[arg(long = "force-secret", value_name = "NAME")]
    pub force_secrets: Vec<String>,

    /// Report secrets needing rotation as failures without writing anything.
    #[arg(long)]
    pub verify_only: bool,

    /// Never prompt, even on a terminal.
    #[arg(long)]
    pub non_interactive: bool,

    /// Identity recorded in the `ChangedBy` tag and audit records.
    #[arg(long, env = "SECRET_MANAGER_CHANGED_BY")]
    pub changed_by: Option<String>,

    /// Azure credentials.
    #[command(flatten)]
    pub credentials: CredentialArgs,
}

/// Azure credentials, normally taken from the environment.
#[derive(Args, Debug, Clone, Default)]
pub struct CredentialArgs {
    /// Entra tenant of the service principal.
    #[arg(long, env = "AZURE_TENANT_ID", hide_env_values = true)]
    pub tenant_id: Option<String>,

    /// Application (client) id of the service principal.
    #[arg(long, env = "AZURE_CLIENT_ID", hide_env_values = true)]
    pub client_id: Option<String>,

    /// Client secret of the service principal.
    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Azure DevOps personal access token.
    #[arg(long, env = "AZURE_DEVOPS_TOKEN", hide_env_values = true)]
    pub devops_token: Option<String>,
}
