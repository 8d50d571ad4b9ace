// error.rs — Error types for the provenance chain.
//
// Tamper evidence is NOT an error here: a broken chain is reported as data in
// `VerificationResult`. The variants below are real faults — the backend could
// not commit or read, or a key could not be loaded.

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by a `RecordStore` backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not durably commit or serve the request.
    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String, transient: bool },

    /// Failed to open or create a backing file.
    #[error("failed to open record file at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write or read a record.
    #[error("record I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record is not valid JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Unavailable { transient, .. } => *transient,
            StorageError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            StorageError::OpenFailed { .. } | StorageError::Serialization(_) => false,
        }
    }
}

/// Errors surfaced by the chain engine.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The storage layer failed (after bounded retries for appends).
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    /// Attributes could not be canonicalized.
    #[error("attribute canonicalization failed: {0}")]
    Canonicalization(#[from] serde_json::Error),

    /// The signing key could not be generated, read or parsed.
    #[error("signing key error at {path}: {reason}")]
    SigningKey { path: PathBuf, reason: String },

    /// The requested session has no records.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// No record with this sequence number exists in the session.
    #[error("session {session_id} has no record with sequence {sequence}")]
    RecordNotFound { session_id: String, sequence: u64 },
}
