//! Records exchanged between callers, agents and the store.
//!
//! Persisted and exported records serialize with camelCase field names so a JSON
//! export can be re-imported by any host that speaks the same shape.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Key of the singleton [`ShardMeta`] record.
pub const META_KEY: &str = "meta";

/// Key prefix for direct response lookups (`resp:{id}`).
pub const RESPONSE_KEY_PREFIX: &str = "resp:";

/// Direct lookup key for a response id.
pub fn response_key(id: &str) -> String {
    format!("{}{}", RESPONSE_KEY_PREFIX, id)
}

/// A typed request routed to one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub user_id: String,
    pub agent_id: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AgentRequest {
    pub fn new(
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Bookkeeping attached to every response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub seed: u32,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
    #[serde(default)]
    pub schema_version: u32,
    /// Set exactly once, when the record lands in a shard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub id: String,
    pub agent_id: String,
    pub user_id: String,
    pub timestamp: String,
    pub lang: String,
    pub level: String,
    pub output: String,
    #[serde(default)]
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditType {
    Info,
    Warn,
    Error,
    Interaction,
}

impl AuditType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Interaction => "interaction",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    User,
    System,
    Security,
}

/// Immutable record of an engine or administrative action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AuditType,
    pub module: String,
    pub timestamp: String,
    pub data: serde_json::Value,
    pub level: AuditLevel,
}

/// Partially specified audit event; unset fields get defaults when recorded.
#[derive(Debug, Clone, Default)]
pub struct AuditEntry {
    pub kind: Option<AuditType>,
    pub module: Option<String>,
    pub level: Option<AuditLevel>,
    pub data: serde_json::Value,
}

impl AuditEntry {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: AuditType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn level(mut self, level: AuditLevel) -> Self {
        self.level = Some(level);
        self
    }
}

/// The two append-only record streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardKind {
    Responses,
    Audit,
}

impl ShardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Responses => "responses",
            Self::Audit => "audit",
        }
    }
}

impl fmt::Display for ShardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide shard membership and schema version, stored under [`META_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardMeta {
    pub schema_version: u32,
    #[serde(default)]
    pub responses_shards: Vec<String>,
    #[serde(default)]
    pub audit_shards: Vec<String>,
}

impl ShardMeta {
    pub fn new(schema_version: u32) -> Self {
        Self {
            schema_version,
            ..Default::default()
        }
    }

    pub fn shards(&self, kind: ShardKind) -> &[String] {
        match kind {
            ShardKind::Responses => &self.responses_shards,
            ShardKind::Audit => &self.audit_shards,
        }
    }

    pub(crate) fn shards_mut(&mut self, kind: ShardKind) -> &mut Vec<String> {
        match kind {
            ShardKind::Responses => &mut self.responses_shards,
            ShardKind::Audit => &mut self.audit_shards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_round_trips_with_camel_case_fields() {
        let json = serde_json::json!({
            "id": "r1",
            "agentId": "echo",
            "userId": "u1",
            "timestamp": "2026-01-01T00:00:00Z",
            "lang": "es",
            "level": "basic",
            "output": "hi",
            "meta": { "durationMs": 3, "seed": 7, "truncated": false, "schemaVersion": 2 }
        });
        let resp: AgentResponse = serde_json::from_value(json).unwrap();
        assert_eq!(resp.agent_id, "echo");
        assert_eq!(resp.meta.schema_version, 2);
        assert!(resp.meta.shard.is_none());

        let back = serde_json::to_value(&resp).unwrap();
        assert_eq!(back["meta"]["durationMs"], 3);
        assert!(back["meta"].get("shard").is_none());
    }

    #[test]
    fn test_audit_event_serializes_kind_as_type() {
        let event = AuditEvent {
            id: "evt-1".into(),
            kind: AuditType::Warn,
            module: "engine".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            data: serde_json::json!({}),
            level: AuditLevel::Security,
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "warn");
        assert_eq!(v["level"], "security");
    }

    #[test]
    fn test_request_missing_optional_fields_deserializes() {
        let req: AgentRequest =
            serde_json::from_str(r#"{"userId":"u1","agentId":"echo","input":"hi"}"#).unwrap();
        assert_eq!(req, AgentRequest::new("u1", "echo", "hi"));
    }
}
