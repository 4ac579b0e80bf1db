//! CLI error types and exit codes.

use secret_manager::ErrorKind;
use thiserror::Error;

/// Exit code for a clean run.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code for unexpected failures and cancellation.
pub const EXIT_FAILURE: u8 = 1;
/// Exit code for invalid manifests, unresolved references and failed verification.
pub const EXIT_VALIDATION: u8 = 2;
/// Exit code when an operator has to act before the run can complete.
pub const EXIT_HUMAN_INTERVENTION: u8 = 3;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Loading or synchronizing failed.
    #[error(transparent)]
    Sync(#[from] secret_manager::Error),

    /// Invalid combination of arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Verify-only found secrets needing rotation.
    #[error("{count} secret(s) failed verification")]
    VerificationFailed {
        /// Number of failing secrets across all manifests.
        count: usize,
    },

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Sync(e) => match e.kind() {
                ErrorKind::Configuration => EXIT_VALIDATION,
                ErrorKind::HumanIntervention => EXIT_HUMAN_INTERVENTION,
                ErrorKind::Transient | ErrorKind::Unexpected => EXIT_FAILURE,
            },
            Self::InvalidArgument(_) | Self::VerificationFailed { .. } => EXIT_VALIDATION,
            Self::Format(_) | Self::Io(_) => EXIT_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(secret_manager::Error::manifest("bad"), EXIT_VALIDATION ; "manifest")]
    #[test_case(secret_manager::Error::UnresolvedReferences { names: vec!["a".into()] }, EXIT_VALIDATION ; "cycle")]
    #[test_case(secret_manager::Error::human_intervention("s", "type it in"), EXIT_HUMAN_INTERVENTION ; "operator")]
    #[test_case(secret_manager::Error::Cancelled, EXIT_FAILURE ; "cancelled")]
    #[test_case(secret_manager::Error::storage("boom"), EXIT_FAILURE ; "storage")]
    fn library_errors_map_to_exit_codes(error: secret_manager::Error, code: u8) {
        assert_eq!(CliError::from(error).exit_code(), code);
    }

    #[test]
    fn verification_failure_is_a_validation_exit() {
        let err = CliError::VerificationFailed { count: 2 };
        assert_eq!(err.exit_code(), EXIT_VALIDATION);
        assert_eq!(err.to_string(), "2 secret(s) failed verification");
    }

    #[test]
    fn cli_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let cli_err = CliError::from(io_err);
        assert!(matches!(cli_err, CliError::Io(_)));
        assert_eq!(cli_err.exit_code(), EXIT_FAILURE);
    }
}
