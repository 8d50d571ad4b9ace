// action.rs — The view of an agent action that policies evaluate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An action about to be taken (or, for simulation, one already taken).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAction {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Tool kind, e.g. `file_read`, `bash`, `network_call`.
    pub tool: String,
    /// Target file path, if the action touches one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Free text searched by keyword rules (command line, URL, arguments).
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

impl PolicyAction {
    pub fn new(session_id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: None,
            tool: tool.into(),
            path: None,
            text: String::new(),
            cost: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Everything keyword rules look at, space separated.
    pub(crate) fn haystack(&self) -> String {
        let mut s = String::with_capacity(self.tool.len() + self.text.len() + 16);
        s.push_str(&self.tool);
        if let Some(path) = &self.path {
            s.push(' ');
            s.push_str(path);
        }
        if !self.text.is_empty() {
            s.push(' ');
            s.push_str(&self.text);
        }
        s
    }
}
