// error.rs — Error types for the audit service.
//
// Each subsystem keeps its own error enum; they convert into `CoreError` at
// this boundary so callers handle one type.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Chain(#[from] pv_chain::ChainError),

    #[error(transparent)]
    Policy(#[from] pv_policy::PolicyError),

    #[error(transparent)]
    Risk(#[from] pv_risk::RiskError),

    /// Opening the record store failed.
    #[error(transparent)]
    Storage(#[from] pv_chain::StorageError),

    /// Failed to read a config file.
    #[error("failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A config file is not valid TOML for the config schema.
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Export serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid mask pattern '{pattern}': {reason}")]
    InvalidMaskPattern { pattern: String, reason: String },

    /// The tracing subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}
