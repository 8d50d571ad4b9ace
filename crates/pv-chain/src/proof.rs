// proof.rs — Self-contained proof bundles for third-party verification.
//
// A bundle holds everything an outside auditor needs: the ordered records,
// the claimed Merkle root, and the public key when records are signed.
// `ProofBundle::verify` uses nothing but the bundle's own contents; an auditor
// who already trusts a key checks against it with `verify_with_key`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::merkle;
use crate::record::ProvenanceRecord;
use crate::signer::SIGNATURE_ALGORITHM;
use crate::verify::{verify_records, TamperDetected, VerificationResult};

/// Hash algorithm identifier published in proof bundles.
pub const HASH_ALGORITHM: &str = "sha256";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofBundle {
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub hash_algorithm: String,
    /// Present only when records are signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_algorithm: Option<String>,
    /// Base64 raw Ed25519 public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub merkle_root: String,
    pub records: Vec<ProvenanceRecord>,
}

impl ProofBundle {
    /// Package a snapshot of a session.
    pub fn new(
        session_id: impl Into<String>,
        records: Vec<ProvenanceRecord>,
        public_key: Option<String>,
    ) -> Self {
        let merkle_root = merkle::merkle_root(
            &records
                .iter()
                .map(|r| r.record_hash.as_str())
                .collect::<Vec<_>>(),
        );
        Self {
            session_id: session_id.into(),
            generated_at: Utc::now(),
            hash_algorithm: HASH_ALGORITHM.to_string(),
            signature_algorithm: public_key.as_ref().map(|_| SIGNATURE_ALGORITHM.to_string()),
            public_key,
            merkle_root,
            records,
        }
    }

    /// Re-derive every hash, link, signature and the Merkle root. Signed
    /// records without a public key in the bundle fail verification.
    pub fn verify(&self) -> VerificationResult {
        if self.public_key.is_none() && self.records.iter().any(|r| r.signature.is_some()) {
            let mut result = self.check(None);
            result.valid = false;
            result.discrepancy_count += 1;
            result.reason = Some(TamperDetected::MissingPublicKey);
            return result;
        }
        self.check(self.public_key.as_deref())
    }

    /// Like `verify`, but every record must be signed by `public_key`
    /// whatever key the bundle itself carries.
    pub fn verify_with_key(&self, public_key: &str) -> VerificationResult {
        self.check(Some(public_key))
    }

    fn check(&self, public_key: Option<&str>) -> VerificationResult {
        let mut result = verify_records(&self.session_id, &self.records, public_key);
        if !result.valid {
            return result;
        }

        let recomputed = merkle::merkle_root(
            &self
                .records
                .iter()
                .map(|r| r.record_hash.as_str())
                .collect::<Vec<_>>(),
        );
        if recomputed != self.merkle_root {
            result.valid = false;
            result.discrepancy_count += 1;
            result.reason = Some(TamperDetected::MerkleRootMismatch {
                expected: recomputed,
                found: self.merkle_root.clone(),
            });
        }
        result
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChainEngine;
    use crate::record::{ActivityType, Attributes};
    use crate::signer::RecordSigner;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn signed_bundle() -> ProofBundle {
        let engine = ChainEngine::new(Arc::new(MemoryStore::new()))
            .with_signer(RecordSigner::generate().unwrap());
        for name in ["ls", "cat README.md", "git status"] {
            engine
                .append("s1", ActivityType::ToolCall, name, Attributes::new())
                .unwrap();
        }
        engine.third_party_proof("s1").unwrap()
    }

    #[test]
    fn bundle_verifies_after_json_round_trip() {
        let bundle = signed_bundle();
        let json = bundle.to_json().unwrap();
        let restored = ProofBundle::from_json(&json).unwrap();
        let result = restored.verify();
        assert!(result.valid, "{:?}", result);
        assert_eq!(result.signatures_checked, 3);
        assert_eq!(restored.signature_algorithm.as_deref(), Some("ed25519"));
    }

    #[test]
    fn forged_root_is_reported() {
        let mut bundle = signed_bundle();
        bundle.merkle_root = crate::hasher::hash_str("forged");
        let result = bundle.verify();
        assert!(!result.valid);
        assert_eq!(result.broken_at, None);
        assert!(matches!(
            result.reason,
            Some(TamperDetected::MerkleRootMismatch { .. })
        ));
    }

    #[test]
    fn edited_record_in_bundle_is_reported() {
        let mut bundle = signed_bundle();
        bundle.records[1].activity_name = "rm -rf /".to_string();
        let result = bundle.verify();
        assert_eq!(result.broken_at, Some(2));
    }

    #[test]
    fn stripped_public_key_fails_verification() {
        let mut bundle = signed_bundle();
        let key = bundle.public_key.take().unwrap();
        let result = bundle.verify();
        assert!(!result.valid);
        assert_eq!(result.signatures_checked, 0);
        assert_eq!(result.reason, Some(TamperDetected::MissingPublicKey));

        let trusted = bundle.verify_with_key(&key);
        assert!(trusted.valid, "{:?}", trusted);
        assert_eq!(trusted.signatures_checked, 3);
    }

    #[test]
    fn substituted_key_is_caught_by_the_trusted_key() {
        let mut bundle = signed_bundle();
        let trusted_key = bundle.public_key.clone().unwrap();
        let other = RecordSigner::generate().unwrap();
        for record in &mut bundle.records {
            record.signature = Some(other.sign(&record.record_hash));
        }
        bundle.public_key = Some(other.public_key().to_string());

        assert!(bundle.verify().valid);
        let result = bundle.verify_with_key(&trusted_key);
        assert!(!result.valid);
        assert_eq!(result.reason, Some(TamperDetected::InvalidSignature));
    }

    #[test]
    fn unsigned_bundle_has_no_key() {
        let bundle = ProofBundle::new("s", Vec::new(), None);
        assert!(bundle.public_key.is_none());
        assert!(bundle.signature_algorithm.is_none());
        assert!(bundle.verify().valid);
    }
}
