// error.rs — Error types for the policy subsystem.
//
// A `deny` decision is not an error: it is a normal `Decision`. Errors here
// are raised only while loading or activating a policy, never while
// evaluating one.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy or one of its rules is malformed; it was not activated.
    #[error("invalid policy '{policy}': {reason}")]
    Validation { policy: String, reason: String },

    /// A tool or path target is not a valid glob.
    #[error("invalid target pattern '{pattern}' in rule '{rule}': {reason}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        reason: String,
    },

    /// No built-in preset has this name.
    #[error("unknown policy preset '{0}' (expected STRICT_ENTERPRISE, BALANCED or DEV_SANDBOX)")]
    UnknownPreset(String),

    /// Failed to read a policy file.
    #[error("failed to read policy file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A policy file is not valid YAML for the policy schema.
    #[error("failed to parse policy: {0}")]
    Parse(#[from] serde_yaml::Error),
}
