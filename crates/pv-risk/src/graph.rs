// graph.rs — Action graph projected from provenance records.
//
// Nodes live in one arena and are addressed by `NodeId`. Edges are stored
// once and indexed by source and target, so cross-session `sameAs` links are
// plain index pairs and never object references.
//
//   Agent ──performed──▶ Session ──performed──▶ ToolCall ──precedes──▶ ToolCall
//                                                 │  used / generated
//                                                 ▼
//                                               Entity ──derivedFrom──▶ Entity
//
// Every record becomes a ToolCall node, including user commands and decision
// records; detectors decide which ones they care about.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use pv_chain::hasher::hash_str;
use pv_chain::{ActivityType, ProvenanceRecord, SessionId};

use crate::classifier::{Sensitivity, SensitivityClassifier};

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:https?|ftp|wss?)://[^\s'"<>`]+"#).expect("Invalid URL regex")
});

/// Shell and attribute patterns that request elevated capabilities.
static PRIVILEGE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?:^|[\s;&|(])sudo\b", "sudo"),
        (r"(?:^|[\s;&|(])doas\b", "sudo"),
        (r"(?:^|[\s;&|(])su(?:\s+-|\s+root\b|\s*$)", "su"),
        (r"\bchmod\s+(?:[ugoa]*\+[rwx]*s|[2-7][0-7]{3})\b", "setuid"),
        (r"\bchmod\s+(?:-R\s+)?0?777\b", "world_writable"),
        (r"\bchown\s+(?:-R\s+)?root\b", "chown_root"),
        (r"--privileged\b", "privileged_container"),
        (r"--cap-add\b", "container_capability"),
        (r"\bsetcap\b", "file_capability"),
    ]
    .into_iter()
    .map(|(p, cap)| (Regex::new(p).expect("Invalid privilege regex"), cap))
    .collect()
});

const NETWORK_TOOLS: &[&str] = &[
    "network_call",
    "http",
    "http_request",
    "fetch",
    "web_fetch",
    "curl",
    "wget",
    "scp",
    "rsync",
    "nc",
    "upload",
];

/// Stable index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    File,
    Url,
    Secret,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::File => write!(f, "file"),
            EntityKind::Url => write!(f, "url"),
            EntityKind::Secret => write!(f, "secret"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeKind {
    Performed,
    Used,
    Generated,
    DerivedFrom,
    Precedes,
    SameAs,
}

/// A policy outcome embedded in a record's `policy` attribute, or carried by
/// a decision record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMark {
    pub effect: String,
    /// Id of the rule that decided, absent for default effects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl PolicyMark {
    pub fn is_allow(&self) -> bool {
        self.effect.eq_ignore_ascii_case("allow")
    }

    /// An allow produced by a named rule rather than by the default effect.
    pub fn is_explicit_allow(&self) -> bool {
        self.is_allow() && self.rule.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub session_id: SessionId,
    /// 0-based position in the session.
    pub index: usize,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub activity_type: ActivityType,
    pub name: String,
    /// Normalized tool kind (`bash`, `file_read`, `network_call`, ...).
    pub tool: String,
    pub is_network: bool,
    /// Elevated capabilities the action requests.
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyMark>,
}

impl ToolCall {
    /// Actions the agent took itself, as opposed to user commands and
    /// decision records.
    pub fn is_action(&self) -> bool {
        !matches!(
            self.activity_type,
            ActivityType::UserCommand | ActivityType::Decision
        )
    }

    /// A decision record that approved something.
    pub fn is_allow_decision(&self) -> bool {
        self.activity_type == ActivityType::Decision
            && self.policy.as_ref().is_some_and(PolicyMark::is_allow)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub session_id: SessionId,
    pub kind: EntityKind,
    pub value: String,
    /// SHA-256 of the value.
    pub identity: String,
    pub sensitivity: Sensitivity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Agent { agent_id: String },
    Session { session_id: SessionId, agent_id: String },
    ToolCall(ToolCall),
    Entity(Entity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Default)]
struct SessionIndex {
    node: Option<NodeId>,
    tool_calls: Vec<NodeId>,
}

/// Arena graph of one or more sessions.
#[derive(Debug, Clone, Default)]
pub struct ActionGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    agents: HashMap<String, NodeId>,
    sessions: BTreeMap<SessionId, SessionIndex>,
    entities: HashMap<(SessionId, EntityKind, String), NodeId>,
}

impl ActionGraph {
    /// Project one session.
    pub fn build(
        session_id: &str,
        records: &[ProvenanceRecord],
        classifier: &SensitivityClassifier,
    ) -> Self {
        let mut graph = Self::default();
        graph.add_session(session_id, records, classifier);
        graph
    }

    /// Project several sessions and link identical entities across them.
    pub fn build_sessions(
        sessions: &[(SessionId, Vec<ProvenanceRecord>)],
        classifier: &SensitivityClassifier,
    ) -> Self {
        let mut graph = Self::default();
        for (session_id, records) in sessions {
            graph.add_session(session_id, records, classifier);
        }
        graph.link_same_entities();
        graph
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn session_ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn session_node(&self, session_id: &str) -> Option<NodeId> {
        self.sessions.get(session_id).and_then(|s| s.node)
    }

    /// ToolCall nodes of a session in record order.
    pub fn tool_calls(&self, session_id: &str) -> &[NodeId] {
        self.sessions
            .get(session_id)
            .map(|s| s.tool_calls.as_slice())
            .unwrap_or(&[])
    }

    pub fn tool_call(&self, id: NodeId) -> Option<&ToolCall> {
        match self.nodes.get(id.0) {
            Some(Node::ToolCall(call)) => Some(call),
            _ => None,
        }
    }

    pub fn entity(&self, id: NodeId) -> Option<&Entity> {
        match self.nodes.get(id.0) {
            Some(Node::Entity(entity)) => Some(entity),
            _ => None,
        }
    }

    /// Nodes reached from `id` over edges of `kind`.
    pub fn targets(&self, id: NodeId, kind: EdgeKind) -> impl Iterator<Item = NodeId> + '_ {
        self.outgoing
            .get(id.0)
            .into_iter()
            .flatten()
            .map(move |e| self.edges[*e])
            .filter(move |e| e.kind == kind)
            .map(|e| e.to)
    }

    /// Nodes pointing at `id` over edges of `kind`.
    pub fn sources(&self, id: NodeId, kind: EdgeKind) -> impl Iterator<Item = NodeId> + '_ {
        self.incoming
            .get(id.0)
            .into_iter()
            .flatten()
            .map(move |e| self.edges[*e])
            .filter(move |e| e.kind == kind)
            .map(|e| e.from)
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    fn push_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        let exists = self.outgoing[from.0]
            .iter()
            .any(|e| self.edges[*e].to == to && self.edges[*e].kind == kind);
        if exists {
            return;
        }
        let idx = self.edges.len();
        self.edges.push(Edge { from, to, kind });
        self.outgoing[from.0].push(idx);
        self.incoming[to.0].push(idx);
    }

    fn agent_node(&mut self, agent_id: &str) -> NodeId {
        if let Some(id) = self.agents.get(agent_id) {
            return *id;
        }
        let id = self.push_node(Node::Agent {
            agent_id: agent_id.to_string(),
        });
        self.agents.insert(agent_id.to_string(), id);
        id
    }

    fn entity_node(
        &mut self,
        session_id: &str,
        kind: EntityKind,
        value: &str,
        sensitivity: Sensitivity,
    ) -> NodeId {
        let key = (session_id.to_string(), kind, value.to_string());
        if let Some(id) = self.entities.get(&key).copied() {
            if let Node::Entity(entity) = &mut self.nodes[id.0] {
                entity.sensitivity = entity.sensitivity.max(sensitivity);
            }
            return id;
        }
        let id = self.push_node(Node::Entity(Entity {
            session_id: session_id.to_string(),
            kind,
            value: value.to_string(),
            identity: hash_str(value),
            sensitivity,
        }));
        self.entities.insert(key, id);
        id
    }

    fn add_session(
        &mut self,
        session_id: &str,
        records: &[ProvenanceRecord],
        classifier: &SensitivityClassifier,
    ) {
        if self.sessions.contains_key(session_id) {
            return;
        }
        let mut index = SessionIndex::default();

        if let Some(first) = records.first() {
            let agent = self.agent_node(&first.agent_id);
            let session = self.push_node(Node::Session {
                session_id: session_id.to_string(),
                agent_id: first.agent_id.clone(),
            });
            self.push_edge(agent, session, EdgeKind::Performed);
            index.node = Some(session);

            let mut previous: Option<NodeId> = None;
            for (i, record) in records.iter().enumerate() {
                let refs = extract_references(record);
                let tool = tool_kind(record);
                let is_network = is_network_tool(&tool)
                    || record.activity_type == ActivityType::NetworkCall
                    || refs.iter().any(|r| r.kind == EntityKind::Url && !r.generated);
                let call = self.push_node(Node::ToolCall(ToolCall {
                    session_id: session_id.to_string(),
                    index: i,
                    sequence: record.sequence,
                    timestamp: record.timestamp,
                    activity_type: record.activity_type.clone(),
                    name: record.activity_name.clone(),
                    tool,
                    is_network,
                    capabilities: capabilities(record),
                    policy: policy_mark(record),
                }));
                self.push_edge(session, call, EdgeKind::Performed);
                if let Some(prev) = previous {
                    self.push_edge(prev, call, EdgeKind::Precedes);
                }
                previous = Some(call);

                let floor = record
                    .attr_str("sensitivity")
                    .and_then(Sensitivity::parse)
                    .unwrap_or_default();
                let mut used = Vec::new();
                let mut generated = Vec::new();
                for r in refs {
                    let level = classifier.classify(r.kind, &r.value).max(floor);
                    let entity = self.entity_node(session_id, r.kind, &r.value, level);
                    if r.generated {
                        self.push_edge(call, entity, EdgeKind::Generated);
                        generated.push(entity);
                    } else {
                        self.push_edge(call, entity, EdgeKind::Used);
                        used.push(entity);
                    }
                }
                for out in &generated {
                    for input in &used {
                        if out != input {
                            self.push_edge(*out, *input, EdgeKind::DerivedFrom);
                        }
                    }
                }
                index.tool_calls.push(call);
            }
        }
        self.sessions.insert(session_id.to_string(), index);
    }

    /// Link each entity to the first entity with the same kind and value in
    /// an earlier-added session.
    fn link_same_entities(&mut self) {
        let mut first_seen: HashMap<(EntityKind, String), NodeId> = HashMap::new();
        let mut links = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Entity(entity) = node {
                let key = (entity.kind, entity.value.clone());
                match first_seen.get(&key) {
                    Some(first) => links.push((NodeId(i), *first)),
                    None => {
                        first_seen.insert(key, NodeId(i));
                    }
                }
            }
        }
        for (from, to) in links {
            self.push_edge(from, to, EdgeKind::SameAs);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reference {
    kind: EntityKind,
    value: String,
    generated: bool,
}

/// Normalized tool kind of a record.
pub fn tool_kind(record: &ProvenanceRecord) -> String {
    normalize_tool(
        &record.activity_type,
        &record.activity_name,
        record.attr_str("tool"),
    )
}

/// Tool kind from an explicit tool name, or derived from the activity: the
/// command word of a tool call (`bash: ls` → `bash`), otherwise the activity
/// tag.
pub fn normalize_tool(activity_type: &ActivityType, name: &str, tool: Option<&str>) -> String {
    if let Some(tool) = tool.map(str::trim).filter(|t| !t.is_empty()) {
        return tool.to_lowercase();
    }
    match activity_type {
        ActivityType::ToolCall => name
            .split(|c: char| c == ':' || c.is_whitespace())
            .find(|s| !s.is_empty())
            .map(str::to_lowercase)
            .unwrap_or_else(|| ActivityType::ToolCall.as_str().to_string()),
        other => other.as_str().to_string(),
    }
}

fn is_network_tool(tool: &str) -> bool {
    NETWORK_TOOLS.contains(&tool)
}

/// Command-like text of a record: its name plus command attributes.
fn command_text(record: &ProvenanceRecord) -> String {
    let mut text = record.activity_name.clone();
    for key in ["command", "cmd", "args", "input"] {
        if let Some(v) = record.attr_str(key) {
            text.push(' ');
            text.push_str(v);
        }
    }
    text
}

fn extract_references(record: &ProvenanceRecord) -> Vec<Reference> {
    let mut refs: Vec<Reference> = Vec::new();
    let mut push = |kind: EntityKind, value: &str, generated: bool| {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let r = Reference {
            kind,
            value: value.to_string(),
            generated,
        };
        if !refs.contains(&r) {
            refs.push(r);
        }
    };

    let tool = tool_kind(record);
    let name = record.activity_name.as_str();
    let name_is_target = name != tool;
    match (&record.activity_type, tool.as_str()) {
        (ActivityType::FileRead, _) | (_, "file_read") if name_is_target => {
            push(EntityKind::File, name, false)
        }
        (ActivityType::FileWrite, _) | (_, "file_write") if name_is_target => {
            push(EntityKind::File, name, true)
        }
        (ActivityType::NetworkCall, _) | (_, "network_call") if name_is_target => {
            push(EntityKind::Url, name, false)
        }
        _ => {}
    }

    for (keys, kind, generated) in [
        (&["path", "file", "source"][..], EntityKind::File, false),
        (&["destination", "output"][..], EntityKind::File, true),
        (&["url"][..], EntityKind::Url, false),
        (&["secret", "secret_name"][..], EntityKind::Secret, false),
    ] {
        for key in keys {
            if let Some(v) = record.attr_str(key) {
                push(kind, v, generated);
            }
        }
    }

    for m in URL_RE.find_iter(&command_text(record)) {
        push(EntityKind::Url, m.as_str(), false);
    }
    refs
}

/// Elevated capabilities requested by a record, deduplicated and sorted.
pub fn capabilities(record: &ProvenanceRecord) -> Vec<String> {
    let text = command_text(record);
    let mut caps: Vec<String> = PRIVILEGE_PATTERNS
        .iter()
        .filter(|(re, _)| re.is_match(&text))
        .map(|(_, cap)| cap.to_string())
        .collect();

    match record.attributes.get("capability") {
        Some(serde_json::Value::String(c)) => caps.push(c.to_lowercase()),
        Some(serde_json::Value::Array(items)) => caps.extend(
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_lowercase),
        ),
        _ => {}
    }
    if record
        .attributes
        .get("elevated")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        caps.push("elevated".to_string());
    }
    caps.sort();
    caps.dedup();
    caps
}

fn policy_mark(record: &ProvenanceRecord) -> Option<PolicyMark> {
    let from_object = record
        .attributes
        .get("policy")
        .and_then(|v| v.as_object())
        .and_then(|obj| {
            let effect = obj.get("effect")?.as_str()?.to_string();
            let rule = obj.get("rule").and_then(|r| r.as_str()).map(str::to_string);
            Some(PolicyMark { effect, rule })
        });
    from_object.or_else(|| {
        (record.activity_type == ActivityType::Decision)
            .then(|| record.attr_str("effect"))
            .flatten()
            .map(|effect| PolicyMark {
                effect: effect.to_string(),
                rule: record.attr_str("rule").map(str::to_string),
            })
    })
}
