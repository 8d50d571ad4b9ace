// baseline.rs — Behavioral baselines for agents.
//
// A baseline summarizes an agent's recent sessions: how often each tool is
// invoked per session (mean and standard deviation), which tool n-grams occur
// and how often, and which elevated capabilities the agent has used before.
// Baselines are computed from the chain on demand or loaded from
// `.provenant/baselines/<agent-id>.json` (agent id encoded as a file stem).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pv_chain::store::encode_file_stem;

use crate::error::RiskError;
use crate::graph::ActionGraph;

/// Separator between tool kinds in an n-gram key.
pub const NGRAM_SEPARATOR: &str = " > ";

/// The behavior of one session, reduced to what baselines need.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionProfile {
    pub session_id: String,
    pub agent_id: String,
    pub last_activity: DateTime<Utc>,
    /// Tool kinds of agent actions, in order.
    pub tools: Vec<String>,
    pub tool_counts: BTreeMap<String, u64>,
    pub capabilities: BTreeSet<String>,
}

impl SessionProfile {
    pub fn from_graph(graph: &ActionGraph, session_id: &str) -> Option<Self> {
        let calls: Vec<_> = graph
            .tool_calls(session_id)
            .iter()
            .filter_map(|id| graph.tool_call(*id))
            .collect();
        let last = calls.last()?;
        let agent_id = graph
            .session_node(session_id)
            .and_then(|id| match graph.node(id) {
                crate::graph::Node::Session { agent_id, .. } => Some(agent_id.clone()),
                _ => None,
            })
            .unwrap_or_default();

        let mut profile = SessionProfile {
            session_id: session_id.to_string(),
            agent_id,
            last_activity: last.timestamp,
            tools: Vec::new(),
            tool_counts: BTreeMap::new(),
            capabilities: BTreeSet::new(),
        };
        for call in calls.iter().filter(|c| c.is_action()) {
            profile.tools.push(call.tool.clone());
            *profile.tool_counts.entry(call.tool.clone()).or_insert(0) += 1;
            profile.capabilities.extend(call.capabilities.iter().cloned());
        }
        Some(profile)
    }

    pub fn ngrams(&self, n: usize) -> Vec<String> {
        ngrams(&self.tools, n)
    }
}

/// Consecutive tool n-grams as `a > b > c` keys.
pub fn ngrams(tools: &[String], n: usize) -> Vec<String> {
    if n == 0 || tools.len() < n {
        return Vec::new();
    }
    tools.windows(n).map(|w| w.join(NGRAM_SEPARATOR)).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    /// Mean invocations per session.
    pub mean: f64,
    /// Population standard deviation of invocations per session.
    pub std_dev: f64,
}

/// A stored behavioral baseline for an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBaseline {
    pub agent_id: String,
    pub computed_at: DateTime<Utc>,
    /// Number of sessions in the baseline sample.
    pub session_count: usize,
    pub ngram_size: usize,
    pub tool_stats: BTreeMap<String, ToolStats>,
    pub ngram_counts: BTreeMap<String, u64>,
    pub ngram_total: u64,
    /// Elevated capabilities seen in the sample.
    pub capabilities: BTreeSet<String>,
    /// Sessions the sample was drawn from.
    #[serde(default)]
    pub sessions: BTreeSet<String>,
}

impl AgentBaseline {
    /// Share of baseline n-grams equal to `ngram`; 0 when never seen.
    pub fn ngram_probability(&self, ngram: &str) -> f64 {
        if self.ngram_total == 0 {
            return 0.0;
        }
        self.ngram_counts.get(ngram).copied().unwrap_or(0) as f64 / self.ngram_total as f64
    }

    /// Stats for a tool; a tool never seen has mean and deviation 0.
    pub fn stats(&self, tool: &str) -> ToolStats {
        self.tool_stats.get(tool).copied().unwrap_or_default()
    }

    pub fn includes_session(&self, session_id: &str) -> bool {
        self.sessions.contains(session_id)
    }
}

/// Compute a baseline from session profiles of one agent.
pub fn compute_baseline(
    agent_id: &str,
    profiles: &[SessionProfile],
    ngram_size: usize,
) -> AgentBaseline {
    let sessions: Vec<&SessionProfile> =
        profiles.iter().filter(|p| p.agent_id == agent_id).collect();
    let session_count = sessions.len();

    let tools: BTreeSet<&str> = sessions
        .iter()
        .flat_map(|p| p.tool_counts.keys().map(String::as_str))
        .collect();
    let mut tool_stats = BTreeMap::new();
    if session_count > 0 {
        let n = session_count as f64;
        for tool in tools {
            let counts: Vec<f64> = sessions
                .iter()
                .map(|p| p.tool_counts.get(tool).copied().unwrap_or(0) as f64)
                .collect();
            let mean = counts.iter().sum::<f64>() / n;
            let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
            tool_stats.insert(
                tool.to_string(),
                ToolStats {
                    mean,
                    std_dev: variance.sqrt(),
                },
            );
        }
    }

    let mut ngram_counts: BTreeMap<String, u64> = BTreeMap::new();
    for profile in &sessions {
        for gram in profile.ngrams(ngram_size) {
            *ngram_counts.entry(gram).or_insert(0) += 1;
        }
    }
    let ngram_total = ngram_counts.values().sum();

    let capabilities = sessions
        .iter()
        .flat_map(|p| p.capabilities.iter().cloned())
        .collect();

    AgentBaseline {
        agent_id: agent_id.to_string(),
        computed_at: Utc::now(),
        session_count,
        ngram_size,
        tool_stats,
        ngram_counts,
        ngram_total,
        capabilities,
        sessions: sessions.iter().map(|p| p.session_id.clone()).collect(),
    }
}

// ── Baseline Store ──

/// Reads and writes baseline JSON files, one per agent.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(agent_id)))
    }

    /// The agent's stored baseline, if one was ever saved.
    pub fn load(&self, agent_id: &str) -> Result<Option<AgentBaseline>, RiskError> {
        let path = self.path_for(agent_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path).map_err(|source| RiskError::BaselineIo {
            path: path.clone(),
            source,
        })?;
        let baseline: AgentBaseline = serde_json::from_str(&data)?;
        Ok(Some(baseline))
    }

    /// Write the baseline over any previous one for the same agent.
    pub fn save(&self, baseline: &AgentBaseline) -> Result<(), RiskError> {
        fs::create_dir_all(&self.dir).map_err(|source| RiskError::BaselineIo {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(&baseline.agent_id);
        let json = serde_json::to_string_pretty(baseline)?;
        fs::write(&path, json).map_err(|source| RiskError::BaselineIo { path, source })?;
        tracing::debug!(
            agent_id = %baseline.agent_id,
            sessions = baseline.session_count,
            "baseline saved"
        );
        Ok(())
    }
}
