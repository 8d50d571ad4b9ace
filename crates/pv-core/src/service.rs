// service.rs — AuditService: the single entry point for agent actions.
//
// Every action goes through the same pipeline:
//
// 1. Build a `PolicyAction` from the event and evaluate it.
// 2. Apply `mask` redaction to the activity name and attributes.
// 3. Embed the decision as a `policy` attribute and append the record.
//
// Denied actions are still recorded: the chain holds every attempt, and the
// annotation says it was blocked. The caller decides what to do with the
// returned decision.

use std::sync::Arc;

use pv_chain::{
    merkle, verify_records, ActivityType, Actor, Attributes, ChainEngine, ChainError, JsonlStore,
    MemoryStore, ProofBundle, ProvenanceRecord, RecordSigner, RecordStore, VerificationResult,
};
use pv_policy::{
    simulate_policy, Decision, Effect, Policy, PolicyAction, PolicyEngine, SimulationReport,
};
use pv_risk::graph::normalize_tool;
use pv_risk::{
    analyze_records, ActionGraph, AnalysisReport, BaselineStore, CancellationFlag, RiskEngine,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::annotation::{PolicyAnnotation, POLICY_ATTR};
use crate::config::{LedgerConfig, StorageBackend};
use crate::error::CoreError;
use crate::export::{prov_document, ExportFormat, SessionExport};
use crate::mask::Masker;
use crate::report::AuditReport;

/// Attribute keys added by the service that keyword rules do not search.
const RESERVED_KEYS: &[&str] = &["tool", "path", "cost", POLICY_ATTR];

/// An agent action as it arrives from the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub activity_type: ActivityType,
    /// Free-form target: command line, file path, URL.
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
    /// Tool kind; derived from the activity when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// File path; file reads and writes default to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub cost: f64,
}

impl ActionEvent {
    pub fn new(activity_type: ActivityType, name: impl Into<String>) -> Self {
        Self {
            activity_type,
            name: name.into(),
            attributes: Attributes::new(),
            tool: None,
            path: None,
            cost: 0.0,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    fn tool_kind(&self) -> String {
        normalize_tool(&self.activity_type, &self.name, self.tool.as_deref())
    }

    fn target_path(&self) -> Option<String> {
        self.path.clone().or_else(|| {
            matches!(
                self.activity_type,
                ActivityType::FileRead | ActivityType::FileWrite
            )
            .then(|| self.name.clone())
        })
    }
}

/// The outcome of `record_action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAction {
    /// The record as appended, after masking.
    pub record: ProvenanceRecord,
    pub decision: Decision,
}

impl RecordedAction {
    pub fn is_permitted(&self) -> bool {
        self.decision.is_permitted()
    }
}

/// Text searched by keyword rules: the activity name plus top-level string
/// attributes, excluding the ones the service adds itself.
fn action_text(name: &str, attributes: &Attributes) -> String {
    let mut text = name.to_string();
    for (key, value) in attributes {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Value::String(s) = value {
            text.push(' ');
            text.push_str(s);
        }
    }
    text
}

/// Rebuild the policy view of a recorded action.
fn replay_action(record: &ProvenanceRecord) -> PolicyAction {
    let tool = normalize_tool(
        &record.activity_type,
        &record.activity_name,
        record.attr_str("tool"),
    );
    let mut action = PolicyAction::new(&record.session_id, tool)
        .with_agent(&record.agent_id)
        .with_text(action_text(&record.activity_name, &record.attributes))
        .with_cost(
            record
                .attributes
                .get("cost")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        )
        .at(record.timestamp);
    if let Some(path) = record.attr_str("path") {
        action = action.with_path(path);
    }
    action
}

pub struct AuditService {
    chain: Arc<ChainEngine>,
    policy: PolicyEngine,
    risk: RiskEngine,
    masker: Masker,
}

impl AuditService {
    pub fn new(chain: Arc<ChainEngine>, policy: PolicyEngine, risk: RiskEngine) -> Self {
        Self {
            chain,
            policy,
            risk,
            masker: Masker::new(),
        }
    }

    /// Build the full service from a ledger config.
    pub fn open(config: &LedgerConfig) -> Result<Self, CoreError> {
        let store: Arc<dyn RecordStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::Jsonl => Arc::new(JsonlStore::open(&config.storage.records_dir)?),
        };
        let mut chain = ChainEngine::new(store).with_retry(config.retry);
        if config.signing.enabled {
            chain = chain.with_signer(RecordSigner::load_or_generate(&config.signing.key_path)?);
        }
        let chain = Arc::new(chain);

        let policy = PolicyEngine::new(config.policy.resolve()?)?;
        let mut risk = RiskEngine::new(Arc::clone(&chain), config.risk.clone())?;
        if let Some(dir) = &config.baselines_dir {
            risk = risk.with_baseline_store(BaselineStore::new(dir.clone()));
        }

        tracing::info!(
            backend = ?config.storage.backend,
            records_dir = %config.storage.records_dir.display(),
            signed = config.signing.enabled,
            policy = %policy.get_policy().name,
            "audit service opened"
        );
        Ok(Self::new(chain, policy, risk))
    }

    /// In-memory, unsigned service with default risk settings.
    pub fn in_memory(policy: Policy) -> Result<Self, CoreError> {
        let chain = Arc::new(ChainEngine::new(Arc::new(MemoryStore::new())));
        let policy = PolicyEngine::new(policy)?;
        let risk = RiskEngine::new(Arc::clone(&chain), Default::default())?;
        Ok(Self::new(chain, policy, risk))
    }

    pub fn with_masker(mut self, masker: Masker) -> Self {
        self.masker = masker;
        self
    }

    pub fn chain(&self) -> &Arc<ChainEngine> {
        &self.chain
    }

    pub fn policy_engine(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn risk_engine(&self) -> &RiskEngine {
        &self.risk
    }

    /// A fresh random session id.
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Evaluate, mask and record an action under the session's current actor.
    pub fn record_action(
        &self,
        session_id: &str,
        event: ActionEvent,
    ) -> Result<RecordedAction, CoreError> {
        self.record_inner(session_id, None, event)
    }

    /// Same as `record_action`, setting the session's actor.
    pub fn record_action_as(
        &self,
        session_id: &str,
        actor: &Actor,
        event: ActionEvent,
    ) -> Result<RecordedAction, CoreError> {
        self.record_inner(session_id, Some(actor), event)
    }

    fn record_inner(
        &self,
        session_id: &str,
        actor: Option<&Actor>,
        event: ActionEvent,
    ) -> Result<RecordedAction, CoreError> {
        let tool = event.tool_kind();
        let path = event.target_path();

        let mut action = PolicyAction::new(session_id, tool.clone())
            .with_text(action_text(&event.name, &event.attributes))
            .with_cost(event.cost);
        if let Some(actor) = actor {
            action = action.with_agent(&actor.agent_id);
        }
        if let Some(p) = &path {
            action = action.with_path(p);
        }
        let decision = self.policy.evaluate(&action);

        let ActionEvent {
            activity_type,
            mut name,
            mut attributes,
            cost,
            ..
        } = event;
        let masked_fields = self.masker.apply(&decision, &mut name, &mut attributes);
        attributes.insert("tool".to_string(), Value::from(tool));
        if let Some(p) = path {
            attributes.insert("path".to_string(), Value::from(p));
        }
        if cost > 0.0 {
            attributes.insert("cost".to_string(), Value::from(cost));
        }
        PolicyAnnotation::from_decision(&decision, masked_fields).attach(&mut attributes)?;

        let record = self.append(session_id, actor, activity_type, name, attributes)?;
        if decision.effect == Effect::Deny {
            tracing::info!(
                session_id,
                sequence = record.sequence,
                rule = decision.matched_rule.as_deref().unwrap_or("-"),
                "action denied by policy"
            );
        }
        Ok(RecordedAction { record, decision })
    }

    fn append(
        &self,
        session_id: &str,
        actor: Option<&Actor>,
        activity_type: ActivityType,
        name: String,
        attributes: Attributes,
    ) -> Result<ProvenanceRecord, ChainError> {
        match actor {
            Some(actor) => self
                .chain
                .append_as(session_id, actor, activity_type, name, attributes),
            None => self.chain.append(session_id, activity_type, name, attributes),
        }
    }

    /// Record a prompt from the human operator. Not policy-evaluated.
    pub fn record_user_command(
        &self,
        session_id: &str,
        actor: Option<&Actor>,
        command: impl Into<String>,
    ) -> Result<ProvenanceRecord, CoreError> {
        Ok(self.append(
            session_id,
            actor,
            ActivityType::UserCommand,
            command.into(),
            Attributes::new(),
        )?)
    }

    /// Record a human or policy decision, e.g. an approval that justifies a
    /// following upload.
    pub fn record_decision(
        &self,
        session_id: &str,
        effect: Effect,
        rule: Option<&str>,
        justification: impl Into<String>,
    ) -> Result<ProvenanceRecord, CoreError> {
        let mut attributes = Attributes::new();
        attributes.insert("effect".to_string(), Value::from(effect.to_string()));
        if let Some(rule) = rule {
            attributes.insert("rule".to_string(), Value::from(rule));
        }
        Ok(self.append(
            session_id,
            None,
            ActivityType::Decision,
            justification.into(),
            attributes,
        )?)
    }

    /// Validate and activate a policy. Limit accounting starts over.
    pub fn set_policy(&self, policy: Policy) -> Result<(), CoreError> {
        Ok(self.policy.set_policy(policy)?)
    }

    pub fn get_policy(&self) -> Arc<Policy> {
        self.policy.get_policy()
    }

    /// Replay a session's recorded actions against `policy` without touching
    /// the live engine. Records without a policy annotation (user commands,
    /// decisions) are skipped. Masked content replays as masked.
    pub fn simulate_session(
        &self,
        policy: &Policy,
        session_id: &str,
    ) -> Result<SimulationReport, CoreError> {
        let records = self.chain.snapshot(session_id)?;
        let history: Vec<PolicyAction> = records
            .iter()
            .filter(|r| r.attributes.contains_key(POLICY_ATTR))
            .map(replay_action)
            .collect();
        Ok(simulate_policy(policy, &history)?)
    }

    pub fn verify(&self, session_id: &str) -> Result<VerificationResult, CoreError> {
        Ok(self.chain.verify(session_id)?)
    }

    pub fn merkle_root(&self, session_id: &str) -> Result<String, CoreError> {
        Ok(self.chain.merkle_root(session_id)?)
    }

    pub fn analyze(&self, session_id: &str) -> Result<AnalysisReport, CoreError> {
        Ok(self.risk.analyze(session_id)?)
    }

    pub fn analyze_with_cancel(
        &self,
        session_id: &str,
        cancel: &CancellationFlag,
    ) -> Result<AnalysisReport, CoreError> {
        Ok(self.risk.analyze_with_cancel(session_id, cancel)?)
    }

    fn nonempty_snapshot(&self, session_id: &str) -> Result<Vec<ProvenanceRecord>, CoreError> {
        let records = self.chain.snapshot(session_id)?;
        if records.is_empty() {
            return Err(ChainError::SessionNotFound(session_id.to_string()).into());
        }
        Ok(records)
    }

    /// Verification, Merkle root, findings and decision tallies for one
    /// session, all computed from a single snapshot.
    pub fn generate_audit_report(&self, session_id: &str) -> Result<AuditReport, CoreError> {
        let records = self.nonempty_snapshot(session_id)?;
        let verification = verify_records(session_id, &records, self.chain.public_key());
        let hashes: Vec<&str> = records.iter().map(|r| r.record_hash.as_str()).collect();
        let merkle_root = merkle::merkle_root(&hashes);

        let agent_id = records[0].agent_id.clone();
        let baseline = self.risk.baseline_for(&agent_id, Some(session_id))?;
        let analysis = analyze_records(
            session_id,
            &records,
            baseline.as_ref(),
            self.risk.config(),
            self.risk.classifier(),
            &CancellationFlag::new(),
        )?;

        let report = AuditReport::build(&records, verification, merkle_root, analysis);
        tracing::info!(
            session_id,
            records = report.record_count,
            valid = report.verification.valid,
            findings = report.findings.len(),
            risk_score = report.risk_score,
            "audit report generated"
        );
        Ok(report)
    }

    /// Self-contained bundle for verification by a party that does not
    /// trust this service.
    pub fn verify_third_party(&self, session_id: &str) -> Result<ProofBundle, CoreError> {
        Ok(self.chain.third_party_proof(session_id)?)
    }

    /// Serialize a session in the requested format (pretty-printed JSON).
    pub fn export(&self, session_id: &str, format: ExportFormat) -> Result<String, CoreError> {
        let records = self.nonempty_snapshot(session_id)?;
        let document = match format {
            ExportFormat::Json => serde_json::to_value(SessionExport::new(
                session_id,
                records,
                self.chain.public_key().map(str::to_string),
            ))?,
            ExportFormat::ProvJsonLd => {
                let graph = ActionGraph::build(session_id, &records, self.risk.classifier());
                prov_document(&graph, &records)
            }
        };
        tracing::debug!(session_id, %format, "session exported");
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Recompute and store an agent's baseline from its sessions.
    pub fn refresh_baseline(&self, agent_id: &str) -> Result<bool, CoreError> {
        Ok(self.risk.refresh_baseline(agent_id)?.is_some())
    }

    /// Release a finished session's chain cursor and limit accounting. Its
    /// records stay in storage.
    pub fn close_session(&self, session_id: &str) {
        self.chain.close_session(session_id);
        self.policy.forget_session(session_id);
    }
}
