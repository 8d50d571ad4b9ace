// policy.rs — Policy and rule definitions.
//
// A policy is a named, ordered list of rules plus optional numeric limits.
// Each rule targets a tool name (glob), a path (glob), or a keyword
// (case-insensitive substring) and carries an effect. Policies are immutable
// once validated: changing governance means building and activating a whole
// new Policy object.
//
// Example policy file:
//
// ```yaml
// name: team-default
// default_effect: allow
// limits:
//   max_actions_per_minute: 120
// rules:
//   - id: deny-env
//     priority: 100
//     target: { kind: path, value: ".env*" }
//     effect: deny
// ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::action::PolicyAction;
use crate::error::PolicyError;

/// What happens to a matched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Proceed.
    Allow,
    /// Block the action.
    Deny,
    /// Proceed, but redact sensitive values before they are recorded.
    Mask,
    /// Proceed and flag for review.
    Warn,
}

impl Effect {
    pub fn is_blocking(self) -> bool {
        self == Effect::Deny
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => write!(f, "allow"),
            Effect::Deny => write!(f, "deny"),
            Effect::Mask => write!(f, "mask"),
            Effect::Warn => write!(f, "warn"),
        }
    }
}

/// What a rule matches against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TargetPattern {
    /// Glob over the tool name (`bash`, `network_*`).
    Tool(String),
    /// Glob over the target path; tried against the full path and its file name.
    Path(String),
    /// Case-insensitive substring of tool, path and text.
    Keyword(String),
}

const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}'];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl TargetPattern {
    pub fn raw(&self) -> &str {
        match self {
            TargetPattern::Tool(p) | TargetPattern::Path(p) | TargetPattern::Keyword(p) => p,
        }
    }

    /// Number of literal characters; longer literals are more specific.
    pub fn specificity(&self) -> usize {
        match self {
            TargetPattern::Tool(p) | TargetPattern::Path(p) => {
                p.chars().filter(|c| !GLOB_META.contains(c)).count()
            }
            TargetPattern::Keyword(k) => k.chars().count(),
        }
    }

    /// Does this target match the action? Invalid globs never match.
    pub fn matches(&self, action: &PolicyAction) -> bool {
        match self {
            TargetPattern::Tool(pattern) => glob_matches(pattern, &action.tool),
            TargetPattern::Path(pattern) => match action.path.as_deref() {
                Some(path) => {
                    glob_matches(pattern, path)
                        || file_name(path).is_some_and(|name| glob_matches(pattern, name))
                }
                None => false,
            },
            TargetPattern::Keyword(keyword) => {
                let needle = keyword.to_lowercase();
                action.haystack().to_lowercase().contains(&needle)
            }
        }
    }
}

impl fmt::Display for TargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPattern::Tool(p) => write!(f, "tool:{}", p),
            TargetPattern::Path(p) => write!(f, "path:{}", p),
            TargetPattern::Keyword(k) => write!(f, "keyword:{}", k),
        }
    }
}

fn glob_matches(pattern: &str, target: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(target, MATCH_OPTIONS),
        Err(_) => false, // fail-closed: an invalid pattern never matches
    }
}

fn file_name(path: &str) -> Option<&str> {
    path.rsplit(['/', '\\']).next().filter(|n| !n.is_empty() && *n != path)
}

/// One governance rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub priority: i32,
    pub target: TargetPattern,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Rule {
    pub fn new(
        id: impl Into<String>,
        priority: i32,
        target: TargetPattern,
        effect: Effect,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            target,
            effect,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Numeric ceilings checked independently of rule matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Actions per session in any 60-second window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_actions_per_minute: Option<u32>,
    /// Cumulative cost of permitted actions per session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_session: Option<f64>,
    /// Cost ceiling for a single action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_action: Option<f64>,
}

impl Limits {
    pub fn is_empty(&self) -> bool {
        self.max_actions_per_minute.is_none()
            && self.max_cost_per_session.is_none()
            && self.max_cost_per_action.is_none()
    }
}

/// A named set of rules and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Effect when no rule matches; `allow` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_effect: Option<Effect>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Policy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            default_effect: None,
            limits: Limits::default(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_default(mut self, effect: Effect) -> Self {
        self.default_effect = Some(effect);
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default_effect(&self) -> Effect {
        self.default_effect.unwrap_or(Effect::Allow)
    }

    /// Reject malformed policies before they can become active.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let invalid = |reason: String| PolicyError::Validation {
            policy: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("policy name must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return Err(invalid("rule id must not be empty".to_string()));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(invalid(format!("duplicate rule id '{}'", rule.id)));
            }
            if rule.target.raw().trim().is_empty() {
                return Err(invalid(format!("rule '{}' has an empty target", rule.id)));
            }
            if let TargetPattern::Tool(p) | TargetPattern::Path(p) = &rule.target {
                Pattern::new(p).map_err(|e| PolicyError::InvalidPattern {
                    rule: rule.id.clone(),
                    pattern: p.clone(),
                    reason: e.msg.to_string(),
                })?;
            }
        }

        if self.limits.max_actions_per_minute == Some(0) {
            return Err(invalid("max_actions_per_minute must be at least 1".to_string()));
        }
        for (label, value) in [
            ("max_cost_per_session", self.limits.max_cost_per_session),
            ("max_cost_per_action", self.limits.max_cost_per_action),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(invalid(format!("{} must be a non-negative number", label)));
                }
            }
        }
        Ok(())
    }

    /// Parse and validate a policy from YAML (JSON is valid YAML too).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PolicyError> {
        let policy: Policy = serde_yaml::from_str(yaml)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load and validate a policy file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| PolicyError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, PolicyError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
