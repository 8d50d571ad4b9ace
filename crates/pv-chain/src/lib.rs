//! # pv-chain
//!
//! Tamper-evident provenance chain for Provenant.
//!
//! Every agent action is recorded as a [`ProvenanceRecord`] whose hash covers
//! its content and its predecessor's hash. [`ChainEngine`] appends records
//! through any [`RecordStore`], verifies whole sessions, computes Merkle roots
//! for anchoring, and packages [`ProofBundle`]s that outside parties can
//! verify without trusting this process.
//!
//! ## Quick Example
//!
//! ```rust
//! use std::sync::Arc;
//! use pv_chain::{ActivityType, Attributes, ChainEngine, MemoryStore};
//!
//! let engine = ChainEngine::new(Arc::new(MemoryStore::new()));
//! engine
//!     .append("session-1", ActivityType::UserCommand, "delete logs", Attributes::new())
//!     .unwrap();
//! assert!(engine.verify("session-1").unwrap().valid);
//! ```

pub mod engine;
pub mod error;
pub mod hasher;
pub mod merkle;
pub mod proof;
pub mod record;
pub mod signer;
pub mod store;
pub mod verify;

pub use engine::{Actor, ChainEngine, RetryPolicy, UNKNOWN_AGENT};
pub use error::{ChainError, StorageError};
pub use hasher::GENESIS_HASH;
pub use merkle::{verify_inclusion, InclusionProof};
pub use proof::ProofBundle;
pub use record::{ActivityType, Attributes, ProvenanceRecord, SessionId};
pub use signer::RecordSigner;
pub use store::{JsonlStore, MemoryStore, RecordStore};
pub use verify::{verify_records, TamperDetected, VerificationResult};
