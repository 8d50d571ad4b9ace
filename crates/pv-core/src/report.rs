// report.rs — Session audit report.
//
// Combines chain verification, the Merkle root and the risk analysis with
// tallies read back from the recorded policy annotations. All parts come from
// one snapshot of the session, so the numbers agree with each other.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pv_chain::{ActivityType, ProvenanceRecord, VerificationResult};
use pv_policy::Effect;
use pv_risk::{AnalysisReport, Finding, RiskLevel};

use crate::annotation::PolicyAnnotation;

/// How the recorded actions were decided.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTally {
    pub allow: usize,
    pub deny: usize,
    pub mask: usize,
    pub warn: usize,
    /// Denials caused by an exceeded limit (also counted in `deny`).
    pub limit_denials: usize,
    /// Actions recorded without a policy annotation.
    pub unannotated: usize,
}

impl DecisionTally {
    fn add(&mut self, annotation: &PolicyAnnotation) {
        match annotation.effect {
            Effect::Allow => self.allow += 1,
            Effect::Deny => self.deny += 1,
            Effect::Mask => self.mask += 1,
            Effect::Warn => self.warn += 1,
        }
        if annotation.limit.is_some() {
            self.limit_denials += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.allow + self.deny + self.mask + self.warn + self.unannotated
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub session_id: String,
    pub agent_id: String,
    pub generated_at: DateTime<Utc>,
    pub record_count: usize,
    pub verification: VerificationResult,
    /// Anchor for external timestamping of the session.
    pub merkle_root: String,
    pub findings: Vec<Finding>,
    pub risk_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_risk_level: Option<RiskLevel>,
    /// Number of baseline sessions the analysis compared against.
    pub baseline_sessions: usize,
    pub decisions: DecisionTally,
    /// Records per activity tag.
    pub activity_counts: BTreeMap<String, usize>,
    /// Policies that governed the session, in order of first use.
    pub policies: Vec<String>,
}

impl AuditReport {
    pub fn build(
        records: &[ProvenanceRecord],
        verification: VerificationResult,
        merkle_root: String,
        analysis: AnalysisReport,
    ) -> Self {
        let mut decisions = DecisionTally::default();
        let mut activity_counts = BTreeMap::new();
        let mut policies: Vec<String> = Vec::new();

        for record in records {
            *activity_counts
                .entry(record.activity_type.as_str().to_string())
                .or_insert(0) += 1;
            match PolicyAnnotation::read(record) {
                Some(annotation) => {
                    decisions.add(&annotation);
                    if !policies.contains(&annotation.policy) {
                        policies.push(annotation.policy);
                    }
                }
                None if is_action(&record.activity_type) => decisions.unannotated += 1,
                None => {}
            }
        }

        let max_risk_level = analysis.max_risk_level();
        Self {
            session_id: analysis.session_id,
            agent_id: records
                .first()
                .map(|r| r.agent_id.clone())
                .unwrap_or_default(),
            generated_at: Utc::now(),
            record_count: records.len(),
            verification,
            merkle_root,
            findings: analysis.findings,
            risk_score: analysis.risk_score,
            max_risk_level,
            baseline_sessions: analysis.baseline_sessions,
            decisions,
            activity_counts,
            policies,
        }
    }

    /// Chain intact and no finding at `High` or above.
    pub fn is_clean(&self) -> bool {
        self.verification.valid && !matches!(self.max_risk_level, Some(l) if l >= RiskLevel::High)
    }
}

fn is_action(activity_type: &ActivityType) -> bool {
    !matches!(activity_type, ActivityType::UserCommand | ActivityType::Decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_chain::{verify_records, Attributes, ChainEngine, MemoryStore};
    use pv_policy::Decision;
    use std::sync::Arc;

    fn annotated(effect: Effect, limit: bool, policy: &str) -> Attributes {
        let decision = Decision {
            effect,
            matched_rule: None,
            target: None,
            reason: String::new(),
            limit_exceeded: limit.then_some(pv_policy::LimitKind::ActionsPerMinute),
            policy_name: policy.to_string(),
        };
        let mut attributes = Attributes::new();
        PolicyAnnotation::from_decision(&decision, 0)
            .attach(&mut attributes)
            .unwrap();
        attributes
    }

    fn empty_analysis(session_id: &str) -> AnalysisReport {
        AnalysisReport {
            session_id: session_id.to_string(),
            agent_id: None,
            analyzed_at: Utc::now(),
            record_count: 0,
            baseline_sessions: 0,
            findings: Vec::new(),
            risk_score: 0.0,
        }
    }

    #[test]
    fn tallies_decisions_and_activities() {
        let engine = ChainEngine::new(Arc::new(MemoryStore::new()));
        let steps = [
            (ActivityType::UserCommand, "clean up", Attributes::new()),
            (ActivityType::FileRead, "a.txt", annotated(Effect::Allow, false, "BALANCED")),
            (ActivityType::FileRead, ".env", annotated(Effect::Mask, false, "BALANCED")),
            (
                ActivityType::ToolCall,
                "bash: ls",
                annotated(Effect::Deny, true, "STRICT_ENTERPRISE"),
            ),
            (ActivityType::ToolCall, "bash: pwd", Attributes::new()),
        ];
        for (activity, name, attributes) in steps {
            engine.append("s1", activity, name, attributes).unwrap();
        }

        let records = engine.snapshot("s1").unwrap();
        let verification = verify_records("s1", &records, None);
        let analysis = empty_analysis("s1");
        let report = AuditReport::build(&records, verification, "root".into(), analysis);

        assert_eq!(report.record_count, 5);
        assert_eq!(report.decisions.allow, 1);
        assert_eq!(report.decisions.mask, 1);
        assert_eq!(report.decisions.deny, 1);
        assert_eq!(report.decisions.limit_denials, 1);
        assert_eq!(report.decisions.unannotated, 1);
        assert_eq!(report.decisions.total(), 4);
        assert_eq!(report.activity_counts["file_read"], 2);
        assert_eq!(report.activity_counts["user_command"], 1);
        assert_eq!(report.policies, vec!["BALANCED", "STRICT_ENTERPRISE"]);
        assert!(report.is_clean());
    }
}
