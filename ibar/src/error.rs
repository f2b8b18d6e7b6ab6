//! Error types for the iBAR scoring pipeline

use polars::prelude::PolarsError;
use thiserror::Error;

/// Main error type for screen scoring and rank aggregation
#[derive(Error, Debug)]
pub enum ScreenError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Invalid count table: {reason}")]
    InvalidCountTable { reason: String },

    #[error("Wrong input file type '{path}': expected .csv (comma separated) or .tsv/.txt (tab separated)")]
    UnsupportedInputFormat { path: String },

    #[error("Rank aggregation executable '{program}' not found: {source}")]
    AggregatorNotFound {
        program: String,
        #[source]
        source: which::Error,
    },

    #[error("Rank aggregation exited with {status}: {stderr}")]
    AggregatorFailed { status: String, stderr: String },

    #[error("Malformed rank aggregation output at line {line}: {reason}")]
    MalformedAggregatorOutput { line: usize, reason: String },

    #[error("Distribution error: {0}")]
    Distribution(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, ScreenError>;
