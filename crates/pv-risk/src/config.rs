// config.rs — Tunable thresholds and weights for risk analysis.
//
// Every field has a default, so a config file only needs the values it
// changes:
//
// ```toml
// [risk]
// exfiltration_window = 8
//
// [risk.weights]
// data_exfiltration = 80.0
// ```

use serde::{Deserialize, Serialize};

use crate::classifier::{default_rules, SensitivityRule};
use crate::detectors::Detector;
use crate::error::RiskError;

/// Points each pattern contributes to the session risk score at confidence 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub data_exfiltration: f64,
    pub privilege_escalation: f64,
    pub suspicious_tool_chain: f64,
    pub behavioral_drift: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            data_exfiltration: 60.0,
            privilege_escalation: 45.0,
            suspicious_tool_chain: 20.0,
            behavioral_drift: 15.0,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, detector: Detector) -> f64 {
        match detector {
            Detector::DataExfiltration => self.data_exfiltration,
            Detector::PrivilegeEscalation => self.privilege_escalation,
            Detector::SuspiciousToolChain => self.suspicious_tool_chain,
            Detector::BehavioralDrift => self.behavioral_drift,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Network calls this many tool calls after a sensitive read still count.
    pub exfiltration_window: usize,
    /// Length of tool n-grams.
    pub ngram_size: usize,
    /// N-grams rarer than this in the baseline are suspicious.
    pub rare_ngram_probability: f64,
    /// Baseline n-grams needed before rarity is judged.
    pub min_baseline_ngrams: u64,
    /// |z| above this flags drift.
    pub drift_z_threshold: f64,
    /// Lower bound on the baseline standard deviation.
    pub drift_std_floor: f64,
    /// Baseline sessions needed before drift is judged.
    pub min_baseline_sessions: usize,
    /// Most recent sessions folded into a computed baseline.
    pub baseline_window: usize,
    pub weights: SeverityWeights,
    pub sensitivity_rules: Vec<SensitivityRule>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            exfiltration_window: 5,
            ngram_size: 3,
            rare_ngram_probability: 0.01,
            min_baseline_ngrams: 20,
            drift_z_threshold: 3.0,
            drift_std_floor: 1.0,
            min_baseline_sessions: 3,
            baseline_window: 20,
            weights: SeverityWeights::default(),
            sensitivity_rules: default_rules(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), RiskError> {
        if self.exfiltration_window == 0 {
            return Err(RiskError::InvalidConfig(
                "exfiltration_window must be at least 1".to_string(),
            ));
        }
        if self.ngram_size < 2 {
            return Err(RiskError::InvalidConfig(
                "ngram_size must be at least 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.rare_ngram_probability) {
            return Err(RiskError::InvalidConfig(
                "rare_ngram_probability must be within [0, 1]".to_string(),
            ));
        }
        if self.drift_z_threshold <= 0.0 || self.drift_std_floor <= 0.0 {
            return Err(RiskError::InvalidConfig(
                "drift thresholds must be positive".to_string(),
            ));
        }
        if self.baseline_window == 0 {
            return Err(RiskError::InvalidConfig(
                "baseline_window must be at least 1".to_string(),
            ));
        }
        for detector in Detector::ALL {
            let w = self.weights.weight(detector);
            if !w.is_finite() || w < 0.0 {
                return Err(RiskError::InvalidConfig(format!(
                    "weight for {} must be a non-negative number",
                    detector
                )));
            }
        }
        Ok(())
    }
}
