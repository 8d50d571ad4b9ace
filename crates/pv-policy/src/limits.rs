// limits.rs — Per-session accounting for policy limits.
//
// Rate limits use a 60-second sliding window over the timestamps of every
// evaluated action in the session. Session cost accumulates only for actions
// that were not denied. A tracker belongs to one active policy; swapping the
// policy starts a fresh tracker.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::action::PolicyAction;
use crate::policy::Limits;

/// Length of the rate-limit window.
pub const RATE_WINDOW_SECS: i64 = 60;

/// Which limit downgraded a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    ActionsPerMinute,
    CostPerSession,
    CostPerAction,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::ActionsPerMinute => write!(f, "max_actions_per_minute"),
            LimitKind::CostPerSession => write!(f, "max_cost_per_session"),
            LimitKind::CostPerAction => write!(f, "max_cost_per_action"),
        }
    }
}

#[derive(Debug, Default)]
struct SessionUsage {
    recent: VecDeque<DateTime<Utc>>,
    spent: f64,
}

impl SessionUsage {
    fn in_window(&mut self, now: DateTime<Utc>) -> usize {
        let horizon = now - Duration::seconds(RATE_WINDOW_SECS);
        while self.recent.front().is_some_and(|t| *t <= horizon) {
            self.recent.pop_front();
        }
        self.recent.iter().filter(|t| **t <= now).count()
    }
}

/// Usage counters for every session seen under one policy.
#[derive(Debug, Default)]
pub struct LimitTracker {
    sessions: HashMap<String, SessionUsage>,
}

impl LimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// First limit this action would exceed, without recording anything.
    pub fn check(&mut self, limits: &Limits, action: &PolicyAction) -> Option<LimitKind> {
        if limits.is_empty() {
            return None;
        }
        if let Some(max) = limits.max_cost_per_action {
            if action.cost > max {
                return Some(LimitKind::CostPerAction);
            }
        }
        let usage = self.sessions.entry(action.session_id.clone()).or_default();
        if let Some(max) = limits.max_actions_per_minute {
            if usage.in_window(action.timestamp) + 1 > max as usize {
                return Some(LimitKind::ActionsPerMinute);
            }
        }
        if let Some(max) = limits.max_cost_per_session {
            if usage.spent + action.cost > max {
                return Some(LimitKind::CostPerSession);
            }
        }
        None
    }

    /// Account for an evaluated action. Denied actions count toward the rate
    /// window but are not charged.
    pub fn record(&mut self, action: &PolicyAction, charged: bool) {
        let usage = self.sessions.entry(action.session_id.clone()).or_default();
        let pos = usage
            .recent
            .iter()
            .rposition(|t| *t <= action.timestamp)
            .map_or(0, |i| i + 1);
        usage.recent.insert(pos, action.timestamp);
        if charged {
            usage.spent += action.cost;
        }
    }

    /// Cumulative charged cost for a session.
    pub fn spent(&self, session_id: &str) -> f64 {
        self.sessions.get(session_id).map_or(0.0, |u| u.spent)
    }

    /// Drop the counters of a finished session.
    pub fn forget(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn tracked_sessions(&self) -> usize {
        self.sessions.len()
    }
}
