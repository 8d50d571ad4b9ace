// finding.rs — Detector output and the per-session report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            RiskLevel::Critical
        } else if confidence >= 0.5 {
            RiskLevel::High
        } else if confidence >= 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// One detected risk pattern. Derived from records, never stored in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub pattern_id: String,
    pub risk_level: RiskLevel,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// 0-based positions of the records involved, ascending.
    pub matched_record_indices: Vec<usize>,
    pub rationale: String,
}

impl Finding {
    pub fn new(
        pattern_id: &str,
        confidence: f64,
        mut matched_record_indices: Vec<usize>,
        rationale: String,
    ) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        matched_record_indices.sort_unstable();
        matched_record_indices.dedup();
        Self {
            pattern_id: pattern_id.to_string(),
            risk_level: RiskLevel::from_confidence(confidence),
            confidence,
            matched_record_indices,
            rationale,
        }
    }
}

/// Findings and score for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub analyzed_at: DateTime<Utc>,
    pub record_count: usize,
    /// Sessions that went into the baseline (0 when none was available).
    pub baseline_sessions: usize,
    pub findings: Vec<Finding>,
    /// `min(100, Σ weight × confidence)`.
    pub risk_score: f64,
}

impl AnalysisReport {
    /// Worst level across findings.
    pub fn max_risk_level(&self) -> Option<RiskLevel> {
        self.findings.iter().map(|f| f.risk_level).max()
    }

    pub fn findings_for<'a>(
        &'a self,
        pattern_id: &'a str,
    ) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings.iter().filter(move |f| f.pattern_id == pattern_id)
    }
}
