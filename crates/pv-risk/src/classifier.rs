// classifier.rs — Sensitivity classification of referenced entities.
//
// Files, URLs and secrets pulled out of records are rated normal, sensitive
// or critical. Ratings come from glob and keyword rules; the highest matching
// rule wins. Secret entities are always critical.

use std::fmt;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::RiskError;
use crate::graph::EntityKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    #[default]
    Normal,
    Sensitive,
    Critical,
}

impl Sensitivity {
    /// Parse an explicit `sensitivity` attribute. Unknown values are ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "low" => Some(Sensitivity::Normal),
            "sensitive" | "medium" | "high" => Some(Sensitivity::Sensitive),
            "critical" => Some(Sensitivity::Critical),
            _ => None,
        }
    }

    pub fn is_sensitive(self) -> bool {
        self >= Sensitivity::Sensitive
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sensitivity::Normal => write!(f, "normal"),
            Sensitivity::Sensitive => write!(f, "sensitive"),
            Sensitivity::Critical => write!(f, "critical"),
        }
    }
}

/// What a sensitivity rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SensitivityMatch {
    /// Glob over the full value and, for paths, the file name.
    Glob(String),
    /// Case-insensitive substring.
    Keyword(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitivityRule {
    #[serde(rename = "match")]
    pub matcher: SensitivityMatch,
    pub level: Sensitivity,
}

impl SensitivityRule {
    pub fn glob(pattern: &str, level: Sensitivity) -> Self {
        Self {
            matcher: SensitivityMatch::Glob(pattern.to_string()),
            level,
        }
    }

    pub fn keyword(word: &str, level: Sensitivity) -> Self {
        Self {
            matcher: SensitivityMatch::Keyword(word.to_string()),
            level,
        }
    }
}

/// Rules used when no configuration overrides them.
pub fn default_rules() -> Vec<SensitivityRule> {
    use Sensitivity::{Critical, Sensitive};
    vec![
        SensitivityRule::glob(".env*", Critical),
        SensitivityRule::glob("*.pem", Critical),
        SensitivityRule::glob("*.key", Critical),
        SensitivityRule::glob("id_rsa*", Critical),
        SensitivityRule::glob("id_ed25519*", Critical),
        SensitivityRule::glob("*.ssh/*", Critical),
        SensitivityRule::glob("*.aws/credentials", Critical),
        SensitivityRule::keyword("credential", Critical),
        SensitivityRule::keyword("secret", Critical),
        SensitivityRule::keyword("password", Critical),
        SensitivityRule::glob("/etc/shadow", Critical),
        SensitivityRule::glob("/etc/passwd", Sensitive),
        SensitivityRule::glob("*.sqlite", Sensitive),
        SensitivityRule::glob("*.db", Sensitive),
        SensitivityRule::glob("*.csv", Sensitive),
        SensitivityRule::keyword("token", Sensitive),
        SensitivityRule::keyword("customer", Sensitive),
        SensitivityRule::keyword("private", Sensitive),
    ]
}

#[derive(Debug, Clone)]
enum Compiled {
    Glob(Pattern),
    Keyword(String),
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
pub struct SensitivityClassifier {
    rules: Vec<(Compiled, Sensitivity)>,
}

impl SensitivityClassifier {
    pub fn new(rules: &[SensitivityRule]) -> Result<Self, RiskError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let compiled = match &rule.matcher {
                    SensitivityMatch::Glob(p) => Compiled::Glob(Pattern::new(p).map_err(|e| {
                        RiskError::InvalidConfig(format!("sensitivity glob '{}': {}", p, e.msg))
                    })?),
                    SensitivityMatch::Keyword(k) => Compiled::Keyword(k.to_lowercase()),
                };
                Ok((compiled, rule.level))
            })
            .collect::<Result<Vec<_>, RiskError>>()?;
        Ok(Self { rules })
    }

    pub fn classify(&self, kind: EntityKind, value: &str) -> Sensitivity {
        let floor = match kind {
            EntityKind::Secret => Sensitivity::Critical,
            _ => Sensitivity::Normal,
        };
        let lowered = value.to_lowercase();
        let name = value.rsplit(['/', '\\']).next().unwrap_or(value);
        self.rules
            .iter()
            .filter(|(compiled, _)| match compiled {
                Compiled::Glob(p) => {
                    p.matches_with(value, MATCH_OPTIONS)
                        || (kind == EntityKind::File && p.matches_with(name, MATCH_OPTIONS))
                }
                Compiled::Keyword(k) => lowered.contains(k.as_str()),
            })
            .map(|(_, level)| *level)
            .fold(floor, Sensitivity::max)
    }
}

impl Default for SensitivityClassifier {
    fn default() -> Self {
        // Built-in rules contain only valid globs.
        Self::new(&default_rules()).unwrap_or(Self { rules: Vec::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_files_are_critical() {
        let c = SensitivityClassifier::default();
        assert_eq!(c.classify(EntityKind::File, ".env"), Sensitivity::Critical);
        assert_eq!(c.classify(EntityKind::File, "/srv/app/.env.production"), Sensitivity::Critical);
        assert_eq!(c.classify(EntityKind::File, "/home/u/.ssh/id_rsa"), Sensitivity::Critical);
        assert_eq!(c.classify(EntityKind::File, "certs/server.PEM"), Sensitivity::Critical);
    }

    #[test]
    fn ordinary_files_are_normal() {
        let c = SensitivityClassifier::default();
        assert_eq!(c.classify(EntityKind::File, "src/main.rs"), Sensitivity::Normal);
        assert_eq!(c.classify(EntityKind::File, "config.py"), Sensitivity::Normal);
        assert_eq!(c.classify(EntityKind::Url, "https://docs.rs"), Sensitivity::Normal);
    }

    #[test]
    fn highest_matching_rule_wins() {
        let c = SensitivityClassifier::default();
        assert_eq!(c.classify(EntityKind::File, "exports/customers.csv"), Sensitivity::Sensitive);
        assert_eq!(
            c.classify(EntityKind::File, "exports/customer_passwords.csv"),
            Sensitivity::Critical
        );
    }

    #[test]
    fn secret_entities_are_always_critical() {
        let c = SensitivityClassifier::new(&[]).unwrap();
        assert_eq!(c.classify(EntityKind::Secret, "DEPLOY"), Sensitivity::Critical);
    }

    #[test]
    fn bad_glob_is_a_config_error() {
        let rules = [SensitivityRule::glob("[oops", Sensitivity::Critical)];
        assert!(matches!(
            SensitivityClassifier::new(&rules),
            Err(RiskError::InvalidConfig(_))
        ));
    }

    #[test]
    fn explicit_attribute_values_parse() {
        assert_eq!(Sensitivity::parse("CRITICAL"), Some(Sensitivity::Critical));
        assert_eq!(Sensitivity::parse("sensitive"), Some(Sensitivity::Sensitive));
        assert_eq!(Sensitivity::parse("whatever"), None);
        assert!(Sensitivity::Critical > Sensitivity::Normal);
    }
}
