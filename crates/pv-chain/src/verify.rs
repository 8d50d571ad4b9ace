// verify.rs — Chain verification.
//
// Verification recomputes every hash from scratch rather than trusting stored
// values, and walks the whole chain. The report names the earliest failing
// sequence number plus how many records failed in total, so later
// discrepancies are counted, never masked.

use serde::{Deserialize, Serialize};

use crate::hasher::{self, GENESIS_HASH};
use crate::record::ProvenanceRecord;
use crate::signer::verify_signature;

/// Why a chain failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TamperDetected {
    /// A record is filed under a different session than the one verified.
    SessionMismatch { expected: String, found: String },
    /// Sequence numbers are not exactly 1, 2, 3, ...
    SequenceGap { expected: u64, found: u64 },
    /// `previous_hash` does not match the prior record's `record_hash`.
    BrokenLink { expected: String, found: String },
    /// The stored `content_hash` does not match the attributes.
    ContentHashMismatch { expected: String, found: String },
    /// The stored `record_hash` does not match the recomputed hash.
    RecordHashMismatch { expected: String, found: String },
    /// A signature is present but does not verify.
    InvalidSignature,
    /// A public key was supplied but the record is unsigned.
    MissingSignature,
    /// Records are signed but no public key came with them.
    MissingPublicKey,
    /// The records verify but do not fold up to the claimed Merkle root.
    MerkleRootMismatch { expected: String, found: String },
}

impl std::fmt::Display for TamperDetected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TamperDetected::SessionMismatch { expected, found } => {
                write!(f, "record belongs to session '{}', expected '{}'", found, expected)
            }
            TamperDetected::SequenceGap { expected, found } => {
                write!(f, "sequence {} where {} was expected", found, expected)
            }
            TamperDetected::BrokenLink { expected, found } => {
                write!(f, "previous_hash {} does not link to {}", found, expected)
            }
            TamperDetected::ContentHashMismatch { expected, found } => {
                write!(f, "content_hash {} but attributes hash to {}", found, expected)
            }
            TamperDetected::RecordHashMismatch { expected, found } => {
                write!(f, "record_hash {} but fields hash to {}", found, expected)
            }
            TamperDetected::InvalidSignature => write!(f, "signature does not verify"),
            TamperDetected::MissingSignature => write!(f, "record is unsigned"),
            TamperDetected::MissingPublicKey => {
                write!(f, "records are signed but no public key was provided")
            }
            TamperDetected::MerkleRootMismatch { expected, found } => {
                write!(f, "merkle root {} but records fold to {}", found, expected)
            }
        }
    }
}

/// Outcome of verifying one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub valid: bool,
    /// Earliest failing sequence number (1-based position when the stored
    /// sequence itself is wrong).
    pub broken_at: Option<u64>,
    pub reason: Option<TamperDetected>,
    pub record_count: usize,
    /// How many records failed at least one check.
    pub discrepancy_count: usize,
    pub signatures_checked: usize,
}

impl VerificationResult {
    pub(crate) fn intact(record_count: usize, signatures_checked: usize) -> Self {
        Self {
            valid: true,
            broken_at: None,
            reason: None,
            record_count,
            discrepancy_count: 0,
            signatures_checked,
        }
    }
}

/// Verify an ordered slice of records belonging to `session_id`.
///
/// When `public_key` is given every record must carry a valid signature.
/// Pure: no I/O, no logging side effects beyond a single warning on failure.
pub fn verify_records(
    session_id: &str,
    records: &[ProvenanceRecord],
    public_key: Option<&str>,
) -> VerificationResult {
    let mut first_failure: Option<(u64, TamperDetected)> = None;
    let mut discrepancy_count = 0;
    let mut signatures_checked = 0;

    for (index, record) in records.iter().enumerate() {
        let position = index as u64 + 1;
        let expected_previous = if index == 0 {
            GENESIS_HASH
        } else {
            records[index - 1].record_hash.as_str()
        };

        let failure = check_record(record, session_id, position, expected_previous, public_key);
        if public_key.is_some() && record.signature.is_some() {
            signatures_checked += 1;
        }

        if let Some(reason) = failure {
            discrepancy_count += 1;
            if first_failure.is_none() {
                first_failure = Some((position, reason));
            }
        }
    }

    match first_failure {
        None => VerificationResult::intact(records.len(), signatures_checked),
        Some((broken_at, reason)) => {
            let detail = reason.to_string();
            tracing::warn!(
                session_id,
                broken_at,
                discrepancy_count,
                detail = detail.as_str(),
                "provenance chain failed verification"
            );
            VerificationResult {
                valid: false,
                broken_at: Some(broken_at),
                reason: Some(reason),
                record_count: records.len(),
                discrepancy_count,
                signatures_checked,
            }
        }
    }
}

/// Run every check on one record; the first failing check is its reason.
fn check_record(
    record: &ProvenanceRecord,
    session_id: &str,
    position: u64,
    expected_previous: &str,
    public_key: Option<&str>,
) -> Option<TamperDetected> {
    if record.session_id != session_id {
        return Some(TamperDetected::SessionMismatch {
            expected: session_id.to_string(),
            found: record.session_id.clone(),
        });
    }

    if record.sequence != position {
        return Some(TamperDetected::SequenceGap {
            expected: position,
            found: record.sequence,
        });
    }

    if record.previous_hash != expected_previous {
        return Some(TamperDetected::BrokenLink {
            expected: expected_previous.to_string(),
            found: record.previous_hash.clone(),
        });
    }

    // Attributes that cannot even be canonicalized cannot match any hash.
    let Ok(canonical) = hasher::canonical_attributes(&record.attributes) else {
        return Some(TamperDetected::ContentHashMismatch {
            expected: "<uncanonicalizable>".to_string(),
            found: record.content_hash.clone(),
        });
    };

    let content_hash = hasher::hash_str(&canonical);
    if record.content_hash != content_hash {
        return Some(TamperDetected::ContentHashMismatch {
            expected: content_hash,
            found: record.content_hash.clone(),
        });
    }

    let recomputed = hasher::record_hash(
        record.sequence,
        &record.activity_type,
        &record.activity_name,
        &record.timestamp,
        &canonical,
        &record.previous_hash,
    );
    if record.record_hash != recomputed {
        return Some(TamperDetected::RecordHashMismatch {
            expected: recomputed,
            found: record.record_hash.clone(),
        });
    }

    if let Some(key) = public_key {
        match &record.signature {
            Some(sig) if verify_signature(key, &record.record_hash, sig) => {}
            Some(_) => return Some(TamperDetected::InvalidSignature),
            None => return Some(TamperDetected::MissingSignature),
        }
    }

    None
}
