// error.rs — Error types for risk analysis.
//
// Findings are data, not errors. Errors here come from reading the chain,
// reading or writing baselines, bad configuration, or cancellation.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    /// Reading session records failed.
    #[error(transparent)]
    Chain(#[from] pv_chain::ChainError),

    /// The analysis was cancelled between detectors.
    #[error("analysis of session '{0}' was cancelled")]
    Cancelled(String),

    /// A baseline file could not be read or written.
    #[error("baseline I/O failed at {path}: {source}")]
    BaselineIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored baseline is not valid JSON.
    #[error("failed to parse baseline: {0}")]
    BaselineParse(#[from] serde_json::Error),

    /// A configuration value is out of range or a pattern is malformed.
    #[error("invalid risk configuration: {0}")]
    InvalidConfig(String),
}
