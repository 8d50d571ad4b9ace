// engine.rs — Policy evaluation engine.
//
// Every action passes through `evaluate()`:
//
// 1. Rank the rules: highest priority first, then the most specific target
//    (most literal characters), then list order.
// 2. The first ranked rule whose target matches decides the effect.
// 3. No match → the policy's default effect (`allow` when unset).
// 4. Limits are checked independently; an exceeded limit turns any
//    permitting effect into `deny`.
//
// `evaluate_policy` is the single decision function. The live engine and
// `simulate_policy` both call it, so enforcing and simulating the same policy
// over the same actions yields identical decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};

use crate::action::PolicyAction;
use crate::error::PolicyError;
use crate::limits::{LimitKind, LimitTracker};
use crate::policy::{Effect, Policy, Rule, TargetPattern};

/// The outcome of evaluating one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub effect: Effect,
    /// Id of the rule that decided, if any rule matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    /// Target of the deciding rule; masking uses it to pick what to redact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetPattern>,
    pub reason: String,
    /// Set when a limit downgraded the decision to `deny`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_exceeded: Option<LimitKind>,
    pub policy_name: String,
}

impl Decision {
    /// Whether the action may proceed (`allow`, `warn` or `mask`).
    pub fn is_permitted(&self) -> bool {
        !self.effect.is_blocking()
    }
}

/// A step in the evaluation chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStep {
    /// Which check was performed (e.g., "rule:deny-env", "limits").
    pub check: String,
    /// The outcome of this check (e.g., "matched", "no match").
    pub outcome: String,
    /// Whether this step decided the effect.
    pub terminal: bool,
}

/// A decision together with every check that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationTrace {
    pub decision: Decision,
    pub steps: Vec<EvaluationStep>,
    /// Rule ids in evaluation order.
    pub rules_checked: Vec<String>,
    /// Rule ids whose target matched, in evaluation order.
    pub matching_rules: Vec<String>,
}

/// Rules in the order they are tried.
pub fn ranked_rules(policy: &Policy) -> Vec<&Rule> {
    let mut ranked: Vec<(usize, &Rule)> = policy.rules.iter().enumerate().collect();
    ranked.sort_by(|(ia, a), (ib, b)| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.target.specificity().cmp(&a.target.specificity()))
            .then_with(|| ia.cmp(ib))
    });
    ranked.into_iter().map(|(_, r)| r).collect()
}

/// Evaluate one action against a policy, updating `tracker`.
///
/// Pure apart from the tracker: no logging, no enforcement.
pub fn evaluate_policy(
    policy: &Policy,
    action: &PolicyAction,
    tracker: &mut LimitTracker,
) -> EvaluationTrace {
    let mut steps = Vec::new();
    let mut rules_checked = Vec::new();
    let mut matching_rules = Vec::new();
    let mut winner: Option<&Rule> = None;

    for rule in ranked_rules(policy) {
        rules_checked.push(rule.id.clone());
        let matched = rule.target.matches(action);
        if matched {
            matching_rules.push(rule.id.clone());
        }
        let decides = matched && winner.is_none();
        steps.push(EvaluationStep {
            check: format!("rule:{}", rule.id),
            outcome: match (matched, decides) {
                (true, true) => format!("matched {} → {}", rule.target, rule.effect),
                (true, false) => format!("matched {} (outranked)", rule.target),
                (false, _) => "no match".to_string(),
            },
            terminal: decides,
        });
        if decides {
            winner = Some(rule);
        }
    }

    let (effect, matched_rule, mut reason) = match winner {
        Some(rule) => (
            rule.effect,
            Some(rule.id.clone()),
            rule.description
                .clone()
                .unwrap_or_else(|| format!("rule '{}' matched {}", rule.id, rule.target)),
        ),
        None => {
            let effect = policy.default_effect();
            steps.push(EvaluationStep {
                check: "default".to_string(),
                outcome: format!("no rule matched → {}", effect),
                terminal: true,
            });
            (effect, None, format!("no rule matched; default {}", effect))
        }
    };

    let mut decision_effect = effect;
    let mut limit_exceeded = None;
    if effect.is_blocking() {
        steps.push(EvaluationStep {
            check: "limits".to_string(),
            outcome: "skipped: already denied".to_string(),
            terminal: false,
        });
    } else if let Some(kind) = tracker.check(&policy.limits, action) {
        decision_effect = Effect::Deny;
        limit_exceeded = Some(kind);
        reason = format!("{} exceeded (was {})", kind, effect);
        steps.push(EvaluationStep {
            check: "limits".to_string(),
            outcome: format!("failed: {} exceeded", kind),
            terminal: true,
        });
    } else {
        steps.push(EvaluationStep {
            check: "limits".to_string(),
            outcome: "passed".to_string(),
            terminal: false,
        });
    }
    tracker.record(action, !decision_effect.is_blocking());

    EvaluationTrace {
        decision: Decision {
            effect: decision_effect,
            matched_rule,
            target: winner.map(|r| r.target.clone()),
            reason,
            limit_exceeded,
            policy_name: policy.name.clone(),
        },
        steps,
        rules_checked,
        matching_rules,
    }
}

/// An activated policy together with its limit accounting.
#[derive(Debug)]
struct ActivePolicy {
    policy: Arc<Policy>,
    usage: Mutex<LimitTracker>,
}

impl ActivePolicy {
    fn new(policy: Arc<Policy>) -> Self {
        Self {
            policy,
            usage: Mutex::new(LimitTracker::new()),
        }
    }

    fn usage(&self) -> MutexGuard<'_, LimitTracker> {
        self.usage.lock().unwrap_or_else(|poisoned| {
            tracing::error!(policy = %self.policy.name, "limit tracker lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// The live policy engine: one active policy, swappable at runtime.
#[derive(Debug)]
pub struct PolicyEngine {
    active: RwLock<Arc<ActivePolicy>>,
    generation: AtomicU64,
}

impl PolicyEngine {
    /// Start with a validated policy.
    pub fn new(policy: Policy) -> Result<Self, PolicyError> {
        policy.validate()?;
        tracing::info!(policy = %policy.name, rules = policy.rules.len(), "policy activated");
        Ok(Self {
            active: RwLock::new(Arc::new(ActivePolicy::new(Arc::new(policy)))),
            generation: AtomicU64::new(1),
        })
    }

    fn snapshot(&self) -> Arc<ActivePolicy> {
        let guard = self.active.read().unwrap_or_else(|poisoned| {
            tracing::error!("active policy lock poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(&guard)
    }

    /// Validate and atomically replace the active policy. Limit accounting
    /// starts over. Evaluations already running finish on the old policy.
    pub fn set_policy(&self, policy: Policy) -> Result<(), PolicyError> {
        policy.validate()?;
        let name = policy.name.clone();
        let rules = policy.rules.len();
        let next = Arc::new(ActivePolicy::new(Arc::new(policy)));
        {
            let mut guard = self.active.write().unwrap_or_else(|poisoned| {
                tracing::error!("active policy lock poisoned, recovering");
                poisoned.into_inner()
            });
            *guard = next;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(policy = %name, rules, generation, "policy activated");
        Ok(())
    }

    pub fn get_policy(&self) -> Arc<Policy> {
        Arc::clone(&self.snapshot().policy)
    }

    /// How many policies have been activated on this engine.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Drop limit accounting for a finished session under the active policy.
    pub fn forget_session(&self, session_id: &str) {
        let active = self.snapshot();
        if active.usage().forget(session_id) {
            tracing::debug!(session_id, "limit accounting released");
        }
    }

    pub fn evaluate(&self, action: &PolicyAction) -> Decision {
        self.evaluate_with_trace(action).decision
    }

    /// Same as `evaluate()`, returning every step taken.
    pub fn evaluate_with_trace(&self, action: &PolicyAction) -> EvaluationTrace {
        let active = self.snapshot();
        let trace = {
            let mut usage = active.usage();
            evaluate_policy(&active.policy, action, &mut usage)
        };

        let decision = &trace.decision;
        if let Some(kind) = decision.limit_exceeded {
            tracing::warn!(
                policy = %decision.policy_name,
                session_id = %action.session_id,
                tool = %action.tool,
                limit = %kind,
                "limit exceeded, action denied"
            );
        } else {
            tracing::debug!(
                policy = %decision.policy_name,
                session_id = %action.session_id,
                tool = %action.tool,
                effect = %decision.effect,
                rule = decision.matched_rule.as_deref().unwrap_or("-"),
                "policy evaluated"
            );
        }
        trace
    }
}
