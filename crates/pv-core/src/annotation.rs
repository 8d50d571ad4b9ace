// annotation.rs — Policy decisions embedded in provenance records.
//
// Every action that passes through the policy engine is recorded with a
// `policy` attribute describing the decision. The annotation is part of the
// hashed content, so a decision cannot be rewritten after the fact without
// breaking the chain.

use serde::{Deserialize, Serialize};

use pv_chain::{Attributes, ProvenanceRecord};
use pv_policy::{Decision, Effect, LimitKind};

/// Attribute key holding the annotation.
pub const POLICY_ATTR: &str = "policy";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAnnotation {
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub policy: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<LimitKind>,
    /// Number of fields redacted by a `mask` decision.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub masked_fields: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl PolicyAnnotation {
    pub fn from_decision(decision: &Decision, masked_fields: usize) -> Self {
        Self {
            effect: decision.effect,
            rule: decision.matched_rule.clone(),
            policy: decision.policy_name.clone(),
            reason: decision.reason.clone(),
            limit: decision.limit_exceeded,
            masked_fields,
        }
    }

    /// Store the annotation in a record's attributes.
    pub fn attach(&self, attributes: &mut Attributes) -> Result<(), serde_json::Error> {
        attributes.insert(POLICY_ATTR.to_string(), serde_json::to_value(self)?);
        Ok(())
    }

    /// The annotation of a recorded action, if it carries one.
    pub fn read(record: &ProvenanceRecord) -> Option<Self> {
        record
            .attributes
            .get(POLICY_ATTR)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_chain::{ActivityType, ChainEngine, MemoryStore};
    use pv_policy::TargetPattern;
    use std::sync::Arc;

    #[test]
    fn annotation_survives_the_chain() {
        let decision = Decision {
            effect: Effect::Deny,
            matched_rule: Some("deny-dotenv".into()),
            target: Some(TargetPattern::Path(".env*".into())),
            reason: "matched rule 'deny-dotenv'".into(),
            limit_exceeded: None,
            policy_name: "STRICT_ENTERPRISE".into(),
        };
        let annotation = PolicyAnnotation::from_decision(&decision, 0);
        let mut attributes = Attributes::new();
        annotation.attach(&mut attributes).unwrap();

        let engine = ChainEngine::new(Arc::new(MemoryStore::new()));
        let record = engine
            .append("s1", ActivityType::FileRead, ".env", attributes)
            .unwrap();
        assert_eq!(PolicyAnnotation::read(&record), Some(annotation));
        assert_eq!(record.attributes[POLICY_ATTR]["effect"], "deny");
        assert!(record.attributes[POLICY_ATTR].get("masked_fields").is_none());
    }

    #[test]
    fn records_without_annotation_read_none() {
        let engine = ChainEngine::new(Arc::new(MemoryStore::new()));
        let record = engine
            .append("s1", ActivityType::UserCommand, "hello", Attributes::new())
            .unwrap();
        assert_eq!(PolicyAnnotation::read(&record), None);
    }
}
