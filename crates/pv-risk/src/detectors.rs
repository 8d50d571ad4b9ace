// detectors.rs — Risk pattern detectors.
//
// The set of detectors is closed: adding a pattern means adding a variant
// here, and every `match` over `Detector` must handle it.
//
// | pattern                 | signal                                          |
// |-------------------------|-------------------------------------------------|
// | data_exfiltration       | sensitive read, then network egress within W    |
// | privilege_escalation    | elevated capability new to the agent            |
// | suspicious_tool_chain   | tool n-gram rare in the agent's baseline        |
// | behavioral_drift        | per-tool invocation count far from baseline     |

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::baseline::{AgentBaseline, NGRAM_SEPARATOR};
use crate::classifier::Sensitivity;
use crate::config::RiskConfig;
use crate::finding::Finding;
use crate::graph::{ActionGraph, EdgeKind, Entity, EntityKind, ToolCall};

/// Everything a detector may look at.
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    pub graph: &'a ActionGraph,
    pub session_id: &'a str,
    pub baseline: Option<&'a AgentBaseline>,
    pub config: &'a RiskConfig,
}

impl<'a> DetectionContext<'a> {
    fn calls(&self) -> Vec<&'a ToolCall> {
        self.graph
            .tool_calls(self.session_id)
            .iter()
            .filter_map(|id| self.graph.tool_call(*id))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detector {
    DataExfiltration,
    PrivilegeEscalation,
    SuspiciousToolChain,
    BehavioralDrift,
}

impl Detector {
    /// Run order.
    pub const ALL: [Detector; 4] = [
        Detector::DataExfiltration,
        Detector::PrivilegeEscalation,
        Detector::SuspiciousToolChain,
        Detector::BehavioralDrift,
    ];

    pub fn pattern_id(self) -> &'static str {
        match self {
            Detector::DataExfiltration => "data_exfiltration",
            Detector::PrivilegeEscalation => "privilege_escalation",
            Detector::SuspiciousToolChain => "suspicious_tool_chain",
            Detector::BehavioralDrift => "behavioral_drift",
        }
    }

    pub fn from_pattern_id(id: &str) -> Option<Self> {
        Detector::ALL.into_iter().find(|d| d.pattern_id() == id)
    }

    pub fn run(self, ctx: &DetectionContext<'_>) -> Vec<Finding> {
        match self {
            Detector::DataExfiltration => data_exfiltration(ctx),
            Detector::PrivilegeEscalation => privilege_escalation(ctx),
            Detector::SuspiciousToolChain => suspicious_tool_chain(ctx),
            Detector::BehavioralDrift => behavioral_drift(ctx),
        }
    }
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pattern_id())
    }
}

fn sensitivity_factor(level: Sensitivity) -> f64 {
    match level {
        Sensitivity::Critical => 1.0,
        Sensitivity::Sensitive => 0.7,
        Sensitivity::Normal => 0.0,
    }
}

/// Most sensitive non-URL entity a call used.
fn most_sensitive_input<'a>(ctx: &DetectionContext<'a>, call_index: usize) -> Option<&'a Entity> {
    let node = *ctx.graph.tool_calls(ctx.session_id).get(call_index)?;
    ctx.graph
        .targets(node, EdgeKind::Used)
        .filter_map(|id| ctx.graph.entity(id))
        .filter(|e| e.kind != EntityKind::Url && e.sensitivity.is_sensitive())
        .max_by_key(|e| e.sensitivity)
}

fn data_exfiltration(ctx: &DetectionContext<'_>) -> Vec<Finding> {
    let calls = ctx.calls();
    let window = ctx.config.exfiltration_window;
    let mut findings = Vec::new();

    for (j, egress) in calls.iter().enumerate() {
        if !egress.is_network || !egress.is_action() {
            continue;
        }
        if egress.policy.as_ref().is_some_and(|p| p.is_explicit_allow()) {
            continue;
        }

        // (confidence, source index, entity)
        let mut best: Option<(f64, usize, &Entity)> = None;
        for i in j.saturating_sub(window)..=j {
            let Some(entity) = most_sensitive_input(ctx, i) else {
                continue;
            };
            let approved = calls
                .get(i + 1..j)
                .unwrap_or(&[])
                .iter()
                .any(|c| c.is_allow_decision());
            if approved {
                continue;
            }
            let distance = j - i;
            let proximity = 1.0 - distance.saturating_sub(1) as f64 / window as f64;
            let confidence = proximity * sensitivity_factor(entity.sensitivity);
            if best.map_or(true, |(c, _, _)| confidence >= c) {
                best = Some((confidence, i, entity));
            }
        }

        if let Some((confidence, i, entity)) = best {
            let steps = j - i;
            findings.push(Finding::new(
                Detector::DataExfiltration.pattern_id(),
                confidence,
                vec![calls[i].index, egress.index],
                format!(
                    "network call '{}' follows use of {} {} '{}' {} with no approving decision",
                    egress.name,
                    entity.sensitivity,
                    entity.kind,
                    entity.value,
                    match steps {
                        0 => "in the same action".to_string(),
                        1 => "by 1 step".to_string(),
                        n => format!("by {} steps", n),
                    }
                ),
            ));
        }
    }
    findings
}

fn privilege_escalation(ctx: &DetectionContext<'_>) -> Vec<Finding> {
    let calls = ctx.calls();
    let established = ctx
        .baseline
        .is_some_and(|b| b.session_count >= ctx.config.min_baseline_sessions);
    let mut known: BTreeSet<String> = ctx
        .baseline
        .map(|b| b.capabilities.clone())
        .unwrap_or_default();
    let mut findings = Vec::new();
    let mut last_action: Option<usize> = None;

    for (j, call) in calls.iter().enumerate() {
        if !call.is_action() {
            continue;
        }
        let start = last_action.map_or(0, |i| i + 1);
        last_action = Some(j);

        let novel: Vec<&String> = call
            .capabilities
            .iter()
            .filter(|c| !known.contains(*c))
            .collect();
        if novel.is_empty() {
            continue;
        }
        let approved = call.policy.as_ref().is_some_and(|p| p.is_explicit_allow())
            || calls[start..j].iter().any(|c| c.is_allow_decision());
        let novel_names: Vec<String> = novel.iter().map(|c| c.to_string()).collect();
        known.extend(novel_names.iter().cloned());
        if approved {
            continue;
        }

        let confidence = if established { 0.85 } else { 0.7 };
        findings.push(Finding::new(
            Detector::PrivilegeEscalation.pattern_id(),
            confidence,
            vec![call.index],
            format!(
                "'{}' requests {} not previously observed for this agent",
                call.name,
                novel_names.join(", ")
            ),
        ));
    }
    findings
}

fn suspicious_tool_chain(ctx: &DetectionContext<'_>) -> Vec<Finding> {
    let Some(baseline) = ctx.baseline else {
        return Vec::new();
    };
    let n = ctx.config.ngram_size;
    if baseline.ngram_size != n || baseline.ngram_total < ctx.config.min_baseline_ngrams {
        return Vec::new();
    }
    let threshold = ctx.config.rare_ngram_probability;
    if threshold <= 0.0 {
        return Vec::new();
    }

    let actions: Vec<&ToolCall> = ctx.calls().into_iter().filter(|c| c.is_action()).collect();
    if actions.len() < n {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut findings = Vec::new();
    for window in actions.windows(n) {
        let gram = window
            .iter()
            .map(|c| c.tool.as_str())
            .collect::<Vec<_>>()
            .join(NGRAM_SEPARATOR);
        if !seen.insert(gram.clone()) {
            continue;
        }
        let p = baseline.ngram_probability(&gram);
        if p >= threshold {
            continue;
        }
        let confidence = 0.4 + 0.5 * (1.0 - p / threshold);
        findings.push(Finding::new(
            Detector::SuspiciousToolChain.pattern_id(),
            confidence,
            window.iter().map(|c| c.index).collect(),
            format!(
                "tool sequence '{}' has baseline probability {:.4} (threshold {})",
                gram, p, threshold
            ),
        ));
    }
    findings
}

fn behavioral_drift(ctx: &DetectionContext<'_>) -> Vec<Finding> {
    let Some(baseline) = ctx.baseline else {
        return Vec::new();
    };
    if baseline.session_count < ctx.config.min_baseline_sessions {
        return Vec::new();
    }

    let mut observed: BTreeMap<&str, Vec<usize>> = baseline
        .tool_stats
        .keys()
        .map(|t| (t.as_str(), Vec::new()))
        .collect();
    let calls = ctx.calls();
    for call in calls.iter().filter(|c| c.is_action()) {
        observed.entry(call.tool.as_str()).or_default().push(call.index);
    }

    let threshold = ctx.config.drift_z_threshold;
    let mut findings = Vec::new();
    for (tool, indices) in observed {
        let stats = baseline.stats(tool);
        let count = indices.len() as f64;
        let std_dev = stats.std_dev.max(ctx.config.drift_std_floor);
        let z = (count - stats.mean) / std_dev;
        if z.abs() <= threshold {
            continue;
        }
        findings.push(Finding::new(
            Detector::BehavioralDrift.pattern_id(),
            (z.abs() / (2.0 * threshold)).min(1.0),
            indices,
            format!(
                "'{}' invoked {} time(s); baseline mean {:.2}, std {:.2}, z = {:.2}",
                tool, count, stats.mean, std_dev, z
            ),
        ));
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{compute_baseline, SessionProfile};
    use crate::classifier::SensitivityClassifier;
    use crate::finding::RiskLevel;
    use pv_chain::{ActivityType, Attributes, ChainEngine, MemoryStore, ProvenanceRecord};
    use serde_json::json;
    use std::sync::Arc;

    type Entry = (ActivityType, &'static str, Attributes);

    fn plain(ty: ActivityType, name: &'static str) -> Entry {
        (ty, name, Attributes::new())
    }

    fn with(ty: ActivityType, name: &'static str, pairs: &[(&str, serde_json::Value)]) -> Entry {
        (
            ty,
            name,
            pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        )
    }

    fn records(session: &str, entries: Vec<Entry>) -> Vec<ProvenanceRecord> {
        let engine = ChainEngine::new(Arc::new(MemoryStore::new()));
        for (ty, name, attrs) in entries {
            engine.append(session, ty, name, attrs).unwrap();
        }
        engine.snapshot(session).unwrap()
    }

    fn graph(entries: Vec<Entry>) -> ActionGraph {
        ActionGraph::build("s", &records("s", entries), &SensitivityClassifier::default())
    }

    fn run(
        detector: Detector,
        graph: &ActionGraph,
        baseline: Option<&AgentBaseline>,
    ) -> Vec<Finding> {
        let config = RiskConfig::default();
        let ctx = DetectionContext {
            graph,
            session_id: "s",
            baseline,
            config: &config,
        };
        detector.run(&ctx)
    }

    fn tool_session(id: &str, tools: &[&'static str]) -> SessionProfile {
        let entries = tools
            .iter()
            .map(|t| with(ActivityType::ToolCall, *t, &[("tool", json!(t))]))
            .collect();
        let g = ActionGraph::build(id, &records(id, entries), &SensitivityClassifier::default());
        SessionProfile::from_graph(&g, id).unwrap()
    }

    #[test]
    fn env_read_then_network_is_exfiltration() {
        let g = graph(vec![
            with(
                ActivityType::ToolCall,
                ".env",
                &[("tool", json!("file_read")), ("sensitivity", json!("critical"))],
            ),
            with(ActivityType::ToolCall, "http://evil.example", &[("tool", json!("network_call"))]),
        ]);
        let findings = run(Detector::DataExfiltration, &g, None);
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.pattern_id, "data_exfiltration");
        assert!(matches!(f.risk_level, RiskLevel::High | RiskLevel::Critical));
        assert_eq!(f.matched_record_indices, vec![0, 1]);
        assert_eq!(f.confidence, 1.0);
    }

    #[test]
    fn confidence_decays_with_distance() {
        let g = graph(vec![
            plain(ActivityType::FileRead, "exports/customers.csv"),
            plain(ActivityType::ToolCall, "bash: ls"),
            plain(ActivityType::ToolCall, "bash: pwd"),
            plain(ActivityType::NetworkCall, "https://paste.example/new"),
        ]);
        let findings = run(Detector::DataExfiltration, &g, None);
        assert_eq!(findings.len(), 1);
        // distance 3 of 5, sensitive file: (1 - 2/5) * 0.7
        assert!((findings[0].confidence - 0.42).abs() < 1e-9);
        assert_eq!(findings[0].risk_level, RiskLevel::Medium);
    }

    #[test]
    fn egress_outside_window_is_ignored() {
        let mut entries = vec![plain(ActivityType::FileRead, ".env")];
        for _ in 0..5 {
            entries.push(plain(ActivityType::ToolCall, "bash: ls"));
        }
        entries.push(plain(ActivityType::NetworkCall, "https://example.com"));
        assert!(run(Detector::DataExfiltration, &graph(entries), None).is_empty());
    }

    #[test]
    fn approving_decision_suppresses_exfiltration() {
        let g = graph(vec![
            plain(ActivityType::FileRead, ".env"),
            with(ActivityType::Decision, "approve upload", &[("effect", json!("allow"))]),
            plain(ActivityType::NetworkCall, "https://vault.example"),
        ]);
        assert!(run(Detector::DataExfiltration, &g, None).is_empty());

        let explicit = graph(vec![
            plain(ActivityType::FileRead, ".env"),
            with(
                ActivityType::NetworkCall,
                "https://vault.example",
                &[("policy", json!({"effect": "allow", "rule": "allow-vault"}))],
            ),
        ]);
        assert!(run(Detector::DataExfiltration, &explicit, None).is_empty());
    }

    #[test]
    fn normal_files_are_not_exfiltration() {
        let g = graph(vec![
            plain(ActivityType::FileRead, "src/main.rs"),
            plain(ActivityType::NetworkCall, "https://crates.io"),
        ]);
        assert!(run(Detector::DataExfiltration, &g, None).is_empty());
    }

    #[test]
    fn new_sudo_is_privilege_escalation_once() {
        let g = graph(vec![
            plain(ActivityType::ToolCall, "bash: sudo systemctl stop auditd"),
            plain(ActivityType::ToolCall, "bash: sudo systemctl start auditd"),
        ]);
        let findings = run(Detector::PrivilegeEscalation, &g, None);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].matched_record_indices, vec![0]);
        assert!(findings[0].rationale.contains("sudo"));
    }

    #[test]
    fn baseline_capabilities_are_not_escalation() {
        let mut baseline = compute_baseline("unknown", &[], 3);
        baseline.capabilities.insert("sudo".to_string());
        let g = graph(vec![plain(ActivityType::ToolCall, "bash: sudo apt update")]);
        assert!(run(Detector::PrivilegeEscalation, &g, Some(&baseline)).is_empty());
    }

    #[test]
    fn allow_decision_approves_escalation() {
        let g = graph(vec![
            with(ActivityType::Decision, "operator approved", &[("effect", json!("allow"))]),
            plain(ActivityType::ToolCall, "bash: sudo apt update"),
        ]);
        assert!(run(Detector::PrivilegeEscalation, &g, None).is_empty());
    }

    #[test]
    fn rare_ngram_needs_enough_baseline() {
        let usual = ["read", "edit", "test", "read", "edit", "test", "read", "edit", "test"];
        let few = vec![tool_session("b0", &usual)];
        let thin = compute_baseline("unknown", &few, 3);
        let g = graph(
            ["read", "curl", "rm"]
                .iter()
                .map(|t| with(ActivityType::ToolCall, *t, &[("tool", json!(t))]))
                .collect(),
        );
        assert!(run(Detector::SuspiciousToolChain, &g, Some(&thin)).is_empty());

        let many: Vec<SessionProfile> = (0..4)
            .map(|i| tool_session(&format!("b{}", i), &usual))
            .collect();
        let thick = compute_baseline("unknown", &many, 3);
        assert!(thick.ngram_total >= 20);
        let findings = run(Detector::SuspiciousToolChain, &g, Some(&thick));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].matched_record_indices, vec![0, 1, 2]);
        assert!((findings[0].confidence - 0.9).abs() < 1e-9);
        assert!(findings[0].rationale.contains("read > curl > rm"));
    }

    #[test]
    fn common_ngrams_are_not_suspicious() {
        let usual = ["read", "edit", "test", "read", "edit", "test", "read", "edit", "test"];
        let many: Vec<SessionProfile> = (0..4)
            .map(|i| tool_session(&format!("b{}", i), &usual))
            .collect();
        let baseline = compute_baseline("unknown", &many, 3);
        let g = graph(
            ["read", "edit", "test"]
                .iter()
                .map(|t| with(ActivityType::ToolCall, *t, &[("tool", json!(t))]))
                .collect(),
        );
        assert!(run(Detector::SuspiciousToolChain, &g, Some(&baseline)).is_empty());
    }

    #[test]
    fn tool_count_spike_is_drift() {
        let profiles: Vec<SessionProfile> = (0..3)
            .map(|i| tool_session(&format!("b{}", i), &["bash", "git"]))
            .collect();
        let baseline = compute_baseline("unknown", &profiles, 3);

        let mut entries: Vec<Entry> = Vec::new();
        for _ in 0..6 {
            entries.push(with(ActivityType::ToolCall, "bash", &[("tool", json!("bash"))]));
        }
        entries.push(with(ActivityType::ToolCall, "git", &[("tool", json!("git"))]));
        let findings = run(Detector::BehavioralDrift, &graph(entries), Some(&baseline));
        assert_eq!(findings.len(), 1);
        // (6 - 1) / max(0, 1.0) = 5 > 3
        assert!(findings[0].rationale.starts_with("'bash'"));
        assert_eq!(findings[0].matched_record_indices.len(), 6);
        assert!((findings[0].confidence - 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn drift_needs_minimum_sessions() {
        let profiles = vec![tool_session("b0", &["bash"])];
        let baseline = compute_baseline("unknown", &profiles, 3);
        let entries: Vec<Entry> = (0..10)
            .map(|_| with(ActivityType::ToolCall, "bash", &[("tool", json!("bash"))]))
            .collect();
        assert!(run(Detector::BehavioralDrift, &graph(entries), Some(&baseline)).is_empty());
    }

    #[test]
    fn pattern_ids_round_trip() {
        for d in Detector::ALL {
            assert_eq!(Detector::from_pattern_id(d.pattern_id()), Some(d));
        }
        assert_eq!(Detector::from_pattern_id("nope"), None);
    }
}
