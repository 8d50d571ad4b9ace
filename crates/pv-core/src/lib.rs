//! # pv-core
//!
//! The Provenant audit service.
//!
//! [`AuditService`] ties the three engines together: every [`ActionEvent`]
//! is evaluated by the policy engine, redacted when the decision is `mask`,
//! and appended to the session's provenance chain with the decision embedded.
//! The same service verifies chains, runs risk analysis, builds
//! [`AuditReport`]s and exports sessions as JSON or PROV JSON-LD.
//!
//! ```no_run
//! use pv_chain::ActivityType;
//! use pv_core::{ActionEvent, AuditService, LedgerConfig};
//!
//! let config = LedgerConfig::load_for_project(".")?;
//! pv_core::logging::init(&config.logging)?;
//! let service = AuditService::open(&config)?;
//!
//! let session = AuditService::new_session_id();
//! let recorded = service.record_action(
//!     &session,
//!     ActionEvent::new(ActivityType::FileRead, "config.py"),
//! )?;
//! assert!(recorded.is_permitted());
//! assert!(service.verify(&session)?.valid);
//! # Ok::<(), pv_core::CoreError>(())
//! ```

pub mod annotation;
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod mask;
pub mod report;
pub mod service;

pub use annotation::PolicyAnnotation;
pub use config::{
    LedgerConfig, LoggingConfig, PolicyConfig, SigningConfig, StorageBackend, StorageConfig,
};
pub use error::CoreError;
pub use export::{prov_document, ExportFormat, SessionExport};
pub use mask::{Masker, MASKED};
pub use report::{AuditReport, DecisionTally};
pub use service::{ActionEvent, AuditService, RecordedAction};
