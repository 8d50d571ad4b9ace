// engine.rs — The provenance chain engine.
//
// ChainEngine assigns sequence numbers, hashes and signs records, and hands
// them to the storage backend. Appends are single-writer per session: a
// short-lived map lock hands out one cursor mutex per session, so different
// sessions append fully in parallel while appends within a session serialize.
//
// Readers (verify, merkle_root, third_party_proof) take the same session lock
// while reading, so they never see a record whose link is not yet final.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, StorageError};
use crate::hasher::{self, GENESIS_HASH};
use crate::merkle::{self, InclusionProof};
use crate::proof::ProofBundle;
use crate::record::{ActivityType, Attributes, ProvenanceRecord, SessionId};
use crate::signer::RecordSigner;
use crate::store::RecordStore;
use crate::verify::{verify_records, VerificationResult};

/// Agent id used when a session's actor is unknown.
pub const UNKNOWN_AGENT: &str = "unknown";

/// Bounded retry for transient storage failures on append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each retry.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 10,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Who performed the actions of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Actor {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Per-session append state.
#[derive(Debug)]
struct SessionCursor {
    recovered: bool,
    next_sequence: u64,
    last_hash: String,
    actor: Option<Actor>,
}

impl SessionCursor {
    fn cold() -> Self {
        Self {
            recovered: false,
            next_sequence: 1,
            last_hash: GENESIS_HASH.to_string(),
            actor: None,
        }
    }
}

/// Builds, links, signs and verifies provenance chains.
pub struct ChainEngine {
    store: Arc<dyn RecordStore>,
    signer: Option<Arc<RecordSigner>>,
    retry: RetryPolicy,
    cursors: Mutex<HashMap<SessionId, Arc<Mutex<SessionCursor>>>>,
}

impl ChainEngine {
    /// Create an engine over a storage backend. Records are unsigned until
    /// a signer is attached.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            signer: None,
            retry: RetryPolicy::default(),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_signer(mut self, signer: RecordSigner) -> Self {
        self.signer = Some(Arc::new(signer));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Base64 public key of the configured signer.
    pub fn public_key(&self) -> Option<&str> {
        self.signer.as_deref().map(RecordSigner::public_key)
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Append an action under the session's existing actor.
    pub fn append(
        &self,
        session_id: &str,
        activity_type: ActivityType,
        activity_name: impl Into<String>,
        attributes: Attributes,
    ) -> Result<ProvenanceRecord, ChainError> {
        self.append_inner(session_id, None, activity_type, activity_name.into(), attributes)
    }

    /// Append an action, setting the session's actor envelope.
    pub fn append_as(
        &self,
        session_id: &str,
        actor: &Actor,
        activity_type: ActivityType,
        activity_name: impl Into<String>,
        attributes: Attributes,
    ) -> Result<ProvenanceRecord, ChainError> {
        self.append_inner(
            session_id,
            Some(actor),
            activity_type,
            activity_name.into(),
            attributes,
        )
    }

    fn append_inner(
        &self,
        session_id: &str,
        actor: Option<&Actor>,
        activity_type: ActivityType,
        activity_name: String,
        attributes: Attributes,
    ) -> Result<ProvenanceRecord, ChainError> {
        let cursor = self.cursor(session_id);
        let mut cursor = lock_cursor(&cursor);
        self.recover(session_id, &mut cursor)?;

        if let Some(actor) = actor {
            cursor.actor = Some(actor.clone());
        }
        let actor = cursor
            .actor
            .clone()
            .unwrap_or_else(|| Actor::new(UNKNOWN_AGENT));

        let canonical = hasher::canonical_attributes(&attributes)?;
        let content_hash = hasher::hash_str(&canonical);
        let timestamp = Utc::now();
        let sequence = cursor.next_sequence;
        let record_hash = hasher::record_hash(
            sequence,
            &activity_type,
            &activity_name,
            &timestamp,
            &canonical,
            &cursor.last_hash,
        );
        let signature = self.signer.as_ref().map(|s| s.sign(&record_hash));

        let record = ProvenanceRecord {
            session_id: session_id.to_string(),
            agent_id: actor.agent_id,
            user_id: actor.user_id,
            sequence,
            timestamp,
            activity_type,
            activity_name,
            attributes,
            content_hash,
            previous_hash: cursor.last_hash.clone(),
            record_hash,
            signature,
        };

        self.persist(session_id, &record)?;

        // Only a committed record advances the cursor.
        cursor.next_sequence += 1;
        cursor.last_hash = record.record_hash.clone();
        if sequence == 1 {
            tracing::info!(session_id, agent_id = %record.agent_id, "provenance session created");
        }
        tracing::debug!(
            session_id,
            sequence,
            activity = %record.activity_type,
            "appended provenance record"
        );
        Ok(record)
    }

    /// Write one record, retrying transient failures with exponential backoff.
    fn persist(&self, session_id: &str, record: &ProvenanceRecord) -> Result<(), ChainError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.append(session_id, record) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!(
                        session_id,
                        sequence = record.sequence,
                        attempt,
                        error = %e,
                        "transient storage failure; retrying append"
                    );
                    std::thread::sleep(self.retry.delay(attempt));
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        session_id,
                        sequence = record.sequence,
                        attempt,
                        error = %e,
                        "append failed; record not committed"
                    );
                    return Err(ChainError::StorageUnavailable(e));
                }
            }
        }
    }

    /// Load chain state for a session this engine has not seen yet.
    fn recover(&self, session_id: &str, cursor: &mut SessionCursor) -> Result<(), StorageError> {
        if cursor.recovered {
            return Ok(());
        }
        let records = self.store.read_all(session_id)?;
        if let Some(last) = records.last() {
            cursor.next_sequence = last.sequence + 1;
            cursor.last_hash = last.record_hash.clone();
            if cursor.actor.is_none() {
                cursor.actor = Some(Actor {
                    agent_id: last.agent_id.clone(),
                    user_id: last.user_id.clone(),
                });
            }
            tracing::debug!(
                session_id,
                next_sequence = cursor.next_sequence,
                "recovered chain state from storage"
            );
        }
        cursor.recovered = true;
        Ok(())
    }

    /// Consistent copy of a session's records, read under the session lock.
    pub fn snapshot(&self, session_id: &str) -> Result<Vec<ProvenanceRecord>, ChainError> {
        let cursor = self.cursor(session_id);
        let records = {
            let _guard = lock_cursor(&cursor);
            self.store.read_all(session_id)
        };
        self.release_if_cold(session_id, &cursor);
        Ok(records?)
    }

    /// Recompute and check the whole chain of a session.
    pub fn verify(&self, session_id: &str) -> Result<VerificationResult, ChainError> {
        let records = self.snapshot(session_id)?;
        Ok(verify_records(session_id, &records, self.public_key()))
    }

    /// Merkle root over the session's record hashes.
    pub fn merkle_root(&self, session_id: &str) -> Result<String, ChainError> {
        let records = self.snapshot(session_id)?;
        Ok(merkle::merkle_root(&record_hashes(&records)))
    }

    /// Inclusion proof for the record with the given sequence number.
    pub fn merkle_proof(
        &self,
        session_id: &str,
        sequence: u64,
    ) -> Result<InclusionProof, ChainError> {
        let records = self.snapshot(session_id)?;
        let index = sequence
            .checked_sub(1)
            .map(|i| i as usize)
            .filter(|i| *i < records.len());
        index
            .and_then(|i| merkle::inclusion_proof(&record_hashes(&records), i))
            .ok_or_else(|| ChainError::RecordNotFound {
                session_id: session_id.to_string(),
                sequence,
            })
    }

    /// Everything an external party needs to verify the session offline.
    pub fn third_party_proof(&self, session_id: &str) -> Result<ProofBundle, ChainError> {
        let records = self.snapshot(session_id)?;
        if records.is_empty() {
            return Err(ChainError::SessionNotFound(session_id.to_string()));
        }
        Ok(ProofBundle::new(
            session_id,
            records,
            self.public_key().map(str::to_string),
        ))
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionId>, ChainError> {
        Ok(self.store.list_sessions()?)
    }

    /// Drop the in-memory cursor of a finished session. Its records stay in
    /// storage; a later append recovers the cursor from there.
    pub fn close_session(&self, session_id: &str) {
        let mut cursors = self.cursors.lock().unwrap_or_else(|poisoned| {
            tracing::error!("cursor map lock poisoned; recovering");
            poisoned.into_inner()
        });
        if cursors.remove(session_id).is_some() {
            tracing::info!(session_id, "provenance session closed");
        }
    }

    /// Forget a cursor that only a read created, so reads of unknown or
    /// idle sessions do not grow the cursor map.
    fn release_if_cold(&self, session_id: &str, cursor: &Arc<Mutex<SessionCursor>>) {
        let mut cursors = self.cursors.lock().unwrap_or_else(|poisoned| {
            tracing::error!("cursor map lock poisoned; recovering");
            poisoned.into_inner()
        });
        // Held by the map and this reader only; nobody can clone it while
        // the map lock is held.
        if Arc::strong_count(cursor) == 2 && !lock_cursor(cursor).recovered {
            cursors.remove(session_id);
        }
    }

    fn cursor(&self, session_id: &str) -> Arc<Mutex<SessionCursor>> {
        let mut cursors = self.cursors.lock().unwrap_or_else(|poisoned| {
            tracing::error!("cursor map lock poisoned; recovering");
            poisoned.into_inner()
        });
        Arc::clone(
            cursors
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SessionCursor::cold()))),
        )
    }
}

fn lock_cursor(cursor: &Mutex<SessionCursor>) -> MutexGuard<'_, SessionCursor> {
    cursor.lock().unwrap_or_else(|poisoned| {
        tracing::error!("session cursor lock poisoned; recovering");
        poisoned.into_inner()
    })
}

fn record_hashes(records: &[ProvenanceRecord]) -> Vec<&str> {
    records.iter().map(|r| r.record_hash.as_str()).collect()
}
