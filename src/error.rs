//! Top-level error types for the msikit binary and library surface.
//!
//! The binder has its own rich error enum; this module wraps it together
//! with CLI and I/O failures so `main` handles one type.

use thiserror::Error;

/// Result type alias for top-level msikit operations
pub type Result<T> = std::result::Result<T, BinderError>;

/// Main error type for the msikit surface
#[derive(Error, Debug)]
pub enum BinderError {
    /// Binder pipeline errors
    #[error(transparent)]
    Bind(#[from] crate::binder::error::Error),

    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON model parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors from anyhow
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },

    /// Input model file is missing or unreadable
    #[error("Cannot read model file '{path}': {reason}")]
    UnreadableModel {
        /// Path to the model file
        path: String,
        /// Reason for the error
        reason: String,
    },
}

impl BinderError {
    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            BinderError::Bind(crate::binder::error::Error::BindFailed(_)) => vec![
                "Review the diagnostics above; every authoring error is listed".to_string(),
                "Re-run with RUST_LOG=debug for per-phase tracing".to_string(),
            ],
            BinderError::Cli(CliError::UnreadableModel { .. }) => vec![
                "Check that the model file exists and is valid JSON".to_string(),
            ],
            _ => Vec::new(),
        }
    }
}
