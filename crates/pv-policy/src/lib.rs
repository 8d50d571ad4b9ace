//! # pv-policy
//!
//! Governance rules for agent actions.
//!
//! A [`Policy`] is an immutable list of [`Rule`]s (tool glob, path glob or
//! keyword → allow/deny/mask/warn) plus optional rate and cost [`Limits`].
//! The [`PolicyEngine`] holds one active policy that can be swapped at runtime
//! without disturbing evaluations in flight, and [`simulate_policy`] replays
//! historical actions through the very same decision function.
//!
//! ```rust
//! use pv_policy::{Effect, PolicyAction, PolicyEngine, PolicyPreset};
//!
//! let engine = PolicyEngine::new(PolicyPreset::StrictEnterprise.policy()).unwrap();
//! let decision = engine.evaluate(&PolicyAction::new("s1", "file_read").with_path(".env"));
//! assert_eq!(decision.effect, Effect::Deny);
//! ```

pub mod action;
pub mod engine;
pub mod error;
pub mod limits;
pub mod policy;
pub mod presets;
pub mod simulation;

pub use action::PolicyAction;
pub use engine::{evaluate_policy, Decision, EvaluationStep, EvaluationTrace, PolicyEngine};
pub use error::PolicyError;
pub use limits::{LimitKind, LimitTracker};
pub use policy::{Effect, Limits, Policy, Rule, TargetPattern};
pub use presets::PolicyPreset;
pub use simulation::{simulate_policy, SimulationReport};
