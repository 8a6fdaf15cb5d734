//! CLI error type with miette diagnostics and exit-code mapping.

use miette::Diagnostic;
use thiserror::Error;

use sastre_core::TaskError;

/// Exit codes: 0 success, 1 fatal task error, 2 invalid usage.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const USAGE: i32 = 2;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("missing controller address")]
    #[diagnostic(
        code(sastre::no_address),
        help("Pass --address or set SASTRE_ADDRESS.")
    )]
    NoAddress,

    #[error("missing credentials")]
    #[diagnostic(
        code(sastre::no_credentials),
        help("Pass --user/--password or set SASTRE_USER / SASTRE_PASSWORD.")
    )]
    NoCredentials,

    #[error("invalid controller address: {address}")]
    #[diagnostic(code(sastre::bad_address))]
    BadAddress { address: String },

    #[error(transparent)]
    #[diagnostic(code(sastre::task))]
    Task(#[from] TaskError),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoAddress | Self::NoCredentials | Self::BadAddress { .. } => exit_code::USAGE,
            Self::Task(task) => match task {
                TaskError::InvalidArg(_)
                | TaskError::InvalidTag(_)
                | TaskError::InvalidRecipe(_) => exit_code::USAGE,
                _ => exit_code::FAILURE,
            },
        }
    }
}
