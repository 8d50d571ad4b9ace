//! # pv-risk
//!
//! Risk analysis over provenance sessions.
//!
//! Records are projected into an [`ActionGraph`] (agents, sessions, tool
//! calls and the files, URLs and secrets they touch). A closed set of
//! [`Detector`]s looks for data exfiltration, privilege escalation,
//! suspicious tool chains and behavioral drift against the agent's
//! [`AgentBaseline`], and the [`RiskEngine`] folds their [`Finding`]s into a
//! weighted session risk score.

pub mod baseline;
pub mod classifier;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod finding;
pub mod graph;

pub use baseline::{compute_baseline, AgentBaseline, BaselineStore, SessionProfile, ToolStats};
pub use classifier::{Sensitivity, SensitivityClassifier, SensitivityMatch, SensitivityRule};
pub use config::{RiskConfig, SeverityWeights};
pub use detectors::{DetectionContext, Detector};
pub use engine::{analyze_records, CancellationFlag, RiskEngine};
pub use error::RiskError;
pub use finding::{AnalysisReport, Finding, RiskLevel};
pub use graph::{
    ActionGraph, Edge, EdgeKind, Entity, EntityKind, Node, NodeId, PolicyMark, ToolCall,
};
