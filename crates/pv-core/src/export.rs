// export.rs — Session export formats.
//
// `Json` is the raw record list with its Merkle root, enough to re-verify the
// chain. `ProvJsonLd` renders the action graph as a W3C PROV document:
// agents become `prov:Agent`, tool calls `prov:Activity`, and touched files,
// URLs and secrets `prov:Entity`, linked with `used`, `wasGeneratedBy`,
// `wasDerivedFrom` and `wasInformedBy`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use pv_chain::{merkle, ProvenanceRecord};
use pv_risk::{ActionGraph, EdgeKind, Node, NodeId};

/// JSON-LD context shared by every PROV export.
pub const PROV_CONTEXT: &str = "http://www.w3.org/ns/prov#";
const PV_NAMESPACE: &str = "https://provenant.dev/ns#";
const OWL_NAMESPACE: &str = "http://www.w3.org/2002/07/owl#";
const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema#";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    ProvJsonLd,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::ProvJsonLd => write!(f, "prov_json_ld"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "json" => Ok(ExportFormat::Json),
            "prov_json_ld" | "prov_jsonld" | "jsonld" | "prov" => Ok(ExportFormat::ProvJsonLd),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

/// The `Json` export of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub session_id: String,
    pub exported_at: DateTime<Utc>,
    pub merkle_root: String,
    pub record_count: usize,
    /// Base64 Ed25519 key the records are signed with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub records: Vec<ProvenanceRecord>,
}

impl SessionExport {
    pub fn new(
        session_id: &str,
        records: Vec<ProvenanceRecord>,
        public_key: Option<String>,
    ) -> Self {
        let hashes: Vec<&str> = records.iter().map(|r| r.record_hash.as_str()).collect();
        Self {
            session_id: session_id.to_string(),
            exported_at: Utc::now(),
            merkle_root: merkle::merkle_root(&hashes),
            record_count: records.len(),
            public_key,
            records,
        }
    }
}

fn agent_iri(agent_id: &str) -> String {
    format!("pv:agent/{}", agent_id)
}

fn session_iri(session_id: &str) -> String {
    format!("pv:session/{}", session_id)
}

fn node_iri(graph: &ActionGraph, id: NodeId) -> String {
    match graph.node(id) {
        Node::Agent { agent_id } => agent_iri(agent_id),
        Node::Session { session_id, .. } => session_iri(session_id),
        Node::ToolCall(call) => format!("pv:activity/{}/{}", call.session_id, call.sequence),
        Node::Entity(entity) => format!("pv:entity/{}/{}", entity.session_id, entity.identity),
    }
}

fn id_refs(graph: &ActionGraph, ids: impl Iterator<Item = NodeId>) -> Value {
    let refs: Vec<Value> = ids.map(|id| json!({ "@id": node_iri(graph, id) })).collect();
    Value::Array(refs)
}

fn insert_refs(
    object: &mut Map<String, Value>,
    key: &str,
    graph: &ActionGraph,
    ids: impl Iterator<Item = NodeId>,
) {
    if let Value::Array(refs) = id_refs(graph, ids) {
        if !refs.is_empty() {
            object.insert(key.to_string(), Value::Array(refs));
        }
    }
}

fn timestamp(ts: &DateTime<Utc>) -> Value {
    json!({
        "@value": ts.to_rfc3339_opts(SecondsFormat::Nanos, true),
        "@type": "xsd:dateTime",
    })
}

/// Render an action graph as a PROV JSON-LD document. `records` supply the
/// record hashes linking each activity back to the chain.
pub fn prov_document(graph: &ActionGraph, records: &[ProvenanceRecord]) -> Value {
    let hashes: HashMap<(&str, u64), &str> = records
        .iter()
        .map(|r| ((r.session_id.as_str(), r.sequence), r.record_hash.as_str()))
        .collect();

    let mut items = Vec::with_capacity(graph.node_count());
    for (id, node) in graph.nodes() {
        let mut object = Map::new();
        object.insert("@id".into(), json!(node_iri(graph, id)));
        match node {
            Node::Agent { agent_id } => {
                object.insert("@type".into(), json!("prov:Agent"));
                object.insert("pv:agentId".into(), json!(agent_id));
            }
            Node::Session { session_id, agent_id } => {
                object.insert("@type".into(), json!(["prov:Activity", "pv:Session"]));
                object.insert("pv:sessionId".into(), json!(session_id));
                object.insert(
                    "prov:wasAssociatedWith".into(),
                    json!({ "@id": agent_iri(agent_id) }),
                );
            }
            Node::ToolCall(call) => {
                object.insert("@type".into(), json!("prov:Activity"));
                object.insert("prov:startedAtTime".into(), timestamp(&call.timestamp));
                object.insert("pv:activityType".into(), json!(call.activity_type.as_str()));
                object.insert("pv:name".into(), json!(call.name));
                object.insert("pv:tool".into(), json!(call.tool));
                object.insert("pv:sequence".into(), json!(call.sequence));
                if let Some(hash) = hashes.get(&(call.session_id.as_str(), call.sequence)) {
                    object.insert("pv:recordHash".into(), json!(hash));
                }
                if let Some(mark) = &call.policy {
                    object.insert("pv:policyEffect".into(), json!(mark.effect));
                }
                insert_refs(
                    &mut object,
                    "prov:wasAssociatedWith",
                    graph,
                    graph
                        .sources(id, EdgeKind::Performed)
                        .flat_map(|session| graph.sources(session, EdgeKind::Performed)),
                );
                insert_refs(&mut object, "prov:used", graph, graph.targets(id, EdgeKind::Used));
                insert_refs(
                    &mut object,
                    "prov:wasInformedBy",
                    graph,
                    graph.sources(id, EdgeKind::Precedes),
                );
            }
            Node::Entity(entity) => {
                object.insert("@type".into(), json!("prov:Entity"));
                object.insert("pv:entityKind".into(), json!(entity.kind.to_string()));
                object.insert("prov:value".into(), json!(entity.value));
                object.insert("pv:sensitivity".into(), json!(entity.sensitivity));
                insert_refs(
                    &mut object,
                    "prov:wasGeneratedBy",
                    graph,
                    graph.sources(id, EdgeKind::Generated),
                );
                insert_refs(
                    &mut object,
                    "prov:wasDerivedFrom",
                    graph,
                    graph.targets(id, EdgeKind::DerivedFrom),
                );
                insert_refs(&mut object, "owl:sameAs", graph, graph.targets(id, EdgeKind::SameAs));
            }
        }
        items.push(Value::Object(object));
    }

    json!({
        "@context": {
            "prov": PROV_CONTEXT,
            "pv": PV_NAMESPACE,
            "owl": OWL_NAMESPACE,
            "xsd": XSD_NAMESPACE,
        },
        "@graph": items,
    })
}
