// record.rs — Provenance record data model.
//
// Every agent action is recorded as a ProvenanceRecord. Records form a chain:
// each one carries the `record_hash` of its predecessor in `previous_hash`, so
// inserting, deleting, reordering or editing any record breaks a link.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session identifiers are opaque strings chosen by the agent host.
pub type SessionId = String;

/// Ordered attribute map attached to a record.
///
/// `BTreeMap` keeps top-level keys sorted; nested objects are sorted during
/// canonicalization (see `hasher::canonical_attributes`).
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// What kind of action a record describes.
///
/// Serialized as a bare snake_case string (`"file_read"`). Unknown tags
/// round-trip through `Other` so records from newer agents still verify.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityType {
    /// A prompt or instruction typed by the human operator.
    UserCommand,
    /// A generic tool invocation (shell, MCP tool, function call).
    ToolCall,
    /// The agent read a file.
    FileRead,
    /// The agent wrote or modified a file.
    FileWrite,
    /// The agent talked to the network.
    NetworkCall,
    /// A policy or human decision about an action.
    Decision,
    /// Any other activity tag.
    Other(String),
}

impl ActivityType {
    /// The stable tag used for hashing and serialization.
    pub fn as_str(&self) -> &str {
        match self {
            ActivityType::UserCommand => "user_command",
            ActivityType::ToolCall => "tool_call",
            ActivityType::FileRead => "file_read",
            ActivityType::FileWrite => "file_write",
            ActivityType::NetworkCall => "network_call",
            ActivityType::Decision => "decision",
            ActivityType::Other(tag) => tag.as_str(),
        }
    }
}

impl From<String> for ActivityType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "user_command" => ActivityType::UserCommand,
            "tool_call" => ActivityType::ToolCall,
            "file_read" => ActivityType::FileRead,
            "file_write" => ActivityType::FileWrite,
            "network_call" => ActivityType::NetworkCall,
            "decision" => ActivityType::Decision,
            _ => ActivityType::Other(tag),
        }
    }
}

impl From<&str> for ActivityType {
    fn from(tag: &str) -> Self {
        ActivityType::from(tag.to_string())
    }
}

impl From<ActivityType> for String {
    fn from(activity: ActivityType) -> Self {
        activity.as_str().to_string()
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single immutable, hash-linked entry describing one agent action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    /// Session this record belongs to (routing envelope, not hashed).
    pub session_id: SessionId,

    /// Agent that performed the action (routing envelope, not hashed).
    pub agent_id: String,

    /// Human on whose behalf the agent acted, if known (envelope, not hashed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// 1-based position within the session.
    pub sequence: u64,

    /// Assigned by the engine at append time (UTC).
    pub timestamp: DateTime<Utc>,

    pub activity_type: ActivityType,

    /// Free-form name or target (command line, path, URL).
    pub activity_name: String,

    #[serde(default)]
    pub attributes: Attributes,

    /// SHA-256 of the canonical attributes alone.
    pub content_hash: String,

    /// `record_hash` of the prior record, or the all-zero sentinel.
    pub previous_hash: String,

    /// SHA-256 over the hashed fields and `previous_hash`.
    pub record_hash: String,

    /// Base64 Ed25519 signature over `record_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ProvenanceRecord {
    /// Fetch a string attribute by key.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    /// Whether this is the first record of its session.
    pub fn is_genesis(&self) -> bool {
        self.sequence == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_type_serializes_as_bare_string() {
        let json = serde_json::to_string(&ActivityType::NetworkCall).unwrap();
        assert_eq!(json, "\"network_call\"");
        let restored: ActivityType = serde_json::from_str("\"file_write\"").unwrap();
        assert_eq!(restored, ActivityType::FileWrite);
    }

    #[test]
    fn unknown_activity_type_is_preserved() {
        let restored: ActivityType = serde_json::from_str("\"memory_recall\"").unwrap();
        assert_eq!(restored, ActivityType::Other("memory_recall".to_string()));
        assert_eq!(restored.as_str(), "memory_recall");
        assert_eq!(
            serde_json::to_string(&restored).unwrap(),
            "\"memory_recall\""
        );
    }

    #[test]
    fn activity_type_display_matches_tag() {
        assert_eq!(ActivityType::UserCommand.to_string(), "user_command");
        assert_eq!(ActivityType::from("decision"), ActivityType::Decision);
    }
}
