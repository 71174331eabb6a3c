// crates/panelfit-core/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Required input unavailable: {0}")]
    DataAvailability(String),

    #[error("Join consistency violation: {0}")]
    JoinConsistency(String),

    #[error(
        "Specification '{spec}' is underidentified: {endogenous} endogenous regressor(s) but only {instruments} excluded instrument(s)"
    )]
    Identification {
        spec: String,
        endogenous: usize,
        instruments: usize,
    },

    #[error(
        "Fixed-effect absorption did not converge after {iterations} iterations (last delta {last_delta:e}, tolerance {tolerance:e})"
    )]
    Convergence {
        iterations: usize,
        last_delta: f64,
        tolerance: f64,
    },

    #[error("Degenerate estimation sample: {0}")]
    DegenerateSample(String),

    #[error("Schema validation failed: {0}")]
    Validation(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML configuration error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    /// Short machine-readable kind tag used in structured failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::DataAvailability(_) => "data_availability",
            PipelineError::JoinConsistency(_) => "join_consistency",
            PipelineError::Identification { .. } => "identification",
            PipelineError::Convergence { .. } => "convergence",
            PipelineError::DegenerateSample(_) => "degenerate_sample",
            PipelineError::Validation(_) => "validation",
            PipelineError::Io(_) => "io",
            PipelineError::Polars(_) => "polars",
            PipelineError::Csv(_) => "csv",
            PipelineError::Json(_) => "json",
            PipelineError::Toml(_) => "toml",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
