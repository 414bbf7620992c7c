//! CLI-specific error types and exit code mapping

use scanguard_core::error::ScanguardError;
use scanguard_verifier::error::{NotifierError, StoreError, VerifierError};

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// JSON serialisation or parsing failed.
    #[error("json error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from scanguard-core.
    #[error("{0}")]
    Core(#[from] ScanguardError),
}

impl From<VerifierError> for CliError {
    fn from(e: VerifierError) -> Self {
        Self::Core(e.into())
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::Core(e.into())
    }
}

impl From<NotifierError> for CliError {
    fn from(e: NotifierError) -> Self {
        Self::Core(e.into())
    }
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                              |
    /// |------|--------------------------------------|
    /// | 0    | Success                              |
    /// | 1    | General / command error              |
    /// | 2    | Configuration error                  |
    /// | 3    | Product, incident or manufacturer not found |
    /// | 4    | Forbidden (manufacturer scanned own product) |
    /// | 10   | IO error                             |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Io(_) => 10,
            Self::Core(e) if e.is_not_found() => 3,
            Self::Core(e) if e.is_forbidden() => 4,
            Self::Core(ScanguardError::Config(_)) => 2,
            Self::Core(ScanguardError::Io(_)) => 10,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Core(_) => 1,
        }
    }
}
