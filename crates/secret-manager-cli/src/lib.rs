//! # secret-manager-cli
//!
//! Command-line front end for the `secret-manager` library.
//!
//! Provides:
//! - `synchronize`: rotate missing, due or forced secrets and ensure keys
//! - `synchronize --verify-only`: report what would rotate, writing nothing
//!
//! Summaries go to stdout as a table or JSON; logs go to stderr. The process
//! exit code tells automation whether the run succeeded, needs an operator or
//! hit a configuration problem (see [`error`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, CredentialArgs, Format, LogFormat, SynchronizeArgs};
pub use error::CliError;
pub use output::{OutputFormat, SyncSummary};
