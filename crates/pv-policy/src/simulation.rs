// simulation.rs — Dry-run a policy over historical actions.
//
// Uses the same decision function as the live engine with its own fresh limit
// accounting. Nothing is logged or enforced and the live engine is untouched.

use serde::{Deserialize, Serialize};

use crate::action::PolicyAction;
use crate::engine::{evaluate_policy, Decision};
use crate::error::PolicyError;
use crate::limits::LimitTracker;
use crate::policy::{Effect, Policy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub policy_name: String,
    pub total: usize,
    pub allowed: usize,
    pub denied: usize,
    pub masked: usize,
    pub warned: usize,
    /// Denials caused by a limit rather than a rule.
    pub limit_downgrades: usize,
    /// One decision per input action, in input order.
    pub decisions: Vec<Decision>,
}

impl SimulationReport {
    pub fn count(&self, effect: Effect) -> usize {
        match effect {
            Effect::Allow => self.allowed,
            Effect::Deny => self.denied,
            Effect::Mask => self.masked,
            Effect::Warn => self.warned,
        }
    }
}

/// Evaluate `history` in order against `policy` as if it had been active.
pub fn simulate_policy(
    policy: &Policy,
    history: &[PolicyAction],
) -> Result<SimulationReport, PolicyError> {
    policy.validate()?;

    let mut tracker = LimitTracker::new();
    let mut report = SimulationReport {
        policy_name: policy.name.clone(),
        total: history.len(),
        allowed: 0,
        denied: 0,
        masked: 0,
        warned: 0,
        limit_downgrades: 0,
        decisions: Vec::with_capacity(history.len()),
    };

    for action in history {
        let decision = evaluate_policy(policy, action, &mut tracker).decision;
        match decision.effect {
            Effect::Allow => report.allowed += 1,
            Effect::Deny => report.denied += 1,
            Effect::Mask => report.masked += 1,
            Effect::Warn => report.warned += 1,
        }
        if decision.limit_exceeded.is_some() {
            report.limit_downgrades += 1;
        }
        report.decisions.push(decision);
    }
    Ok(report)
}
