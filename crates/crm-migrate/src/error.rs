//! Error types for the migration library.
//!
//! Only run-level failures live here. A failed search page or write chunk is
//! not an error at this level: it is reported as a dropped unit of work
//! (see [`crate::api::UnitOutcome`]) and ends up in the run log and residue.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (missing setting, invalid YAML value, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid command argument (unknown record type, empty file name)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// CSV read or write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Config error for a missing required setting.
    pub fn missing_setting(name: impl Into<String>) -> Self {
        MigrateError::Config(format!("{} is required", name.into()))
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
