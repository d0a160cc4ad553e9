//! Error types for screen processing

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can abort a screen-processing run.
///
/// Statistical edge cases (empty groups, all-missing columns, zero variance)
/// never show up here; they resolve to missing values in the tables.
#[derive(Error, Debug)]
pub enum ScreenError {
    #[error("Invalid experiment configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("condition {condition}, replicate {replicate} and counts file {} are already assigned", file.display())]
    DuplicateExperiment {
        condition: String,
        replicate: String,
        file: PathBuf,
    },

    #[error("filter type not recognized or not implemented: {0}")]
    UnknownFilterType(String),

    #[error("pseudocount behavior not recognized or not implemented: {0}")]
    UnknownPseudocountBehavior(String),

    #[error("analysis {0} not recognized or not implemented")]
    UnknownAnalysis(String),

    #[error("Invalid library table: {reason}")]
    InvalidLibrary { reason: String },

    #[error("Invalid counts file {}: {reason}", path.display())]
    InvalidCounts { path: PathBuf, reason: String },

    #[error("Missing column {column} in {table}")]
    MissingColumn { table: String, column: String },

    #[error("Plotting failed for {figure}: {reason}")]
    Plot { figure: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScreenError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        ScreenError::InvalidConfig { reason: reason.into() }
    }

    pub(crate) fn library(reason: impl Into<String>) -> Self {
        ScreenError::InvalidLibrary { reason: reason.into() }
    }
}

/// Result type alias for screen-processing operations
pub type Result<T> = std::result::Result<T, ScreenError>;
