// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Memory records shared by both tiers
//!
//! A [`MemoryRecord`] is written by any producer into the episodic tier and is
//! later promoted into the semantic tier by consolidation. The only mutation a
//! record ever sees after creation is the `consolidated` flag flipping to true.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::MemoryError;

/// Stable identifier of a memory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MemoryId {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(MemoryId)
            .map_err(|e| MemoryError::Validation(format!("invalid memory id '{}': {}", s, e)))
    }
}

/// Which tier a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Short-term, similarity-searchable vector store
    Episodic,
    /// Long-term, relationship-aware graph store
    Semantic,
}

impl Tier {
    pub fn other(self) -> Self {
        match self {
            Tier::Episodic => Tier::Semantic,
            Tier::Semantic => Tier::Episodic,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Episodic => "episodic",
            Tier::Semantic => "semantic",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(Tier::Episodic),
            "semantic" => Ok(Tier::Semantic),
            other => Err(MemoryError::Validation(format!("unknown tier '{}'", other))),
        }
    }
}

/// Producer-declared category of a record
///
/// Unknown kinds round-trip through [`MemoryKind::Other`] so producers can add
/// categories without a schema change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemoryKind {
    Interaction,
    Thread,
    TaskUpdate,
    AgentStatus,
    GraphUpdate,
    Consolidation,
    Other(String),
}

impl MemoryKind {
    pub fn as_str(&self) -> &str {
        match self {
            MemoryKind::Interaction => "interaction",
            MemoryKind::Thread => "thread",
            MemoryKind::TaskUpdate => "task_update",
            MemoryKind::AgentStatus => "agent_status",
            MemoryKind::GraphUpdate => "graph_update",
            MemoryKind::Consolidation => "consolidation",
            MemoryKind::Other(kind) => kind,
        }
    }
}

impl From<String> for MemoryKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "interaction" => MemoryKind::Interaction,
            "thread" => MemoryKind::Thread,
            "task_update" => MemoryKind::TaskUpdate,
            "agent_status" => MemoryKind::AgentStatus,
            "graph_update" => MemoryKind::GraphUpdate,
            "consolidation" => MemoryKind::Consolidation,
            _ => MemoryKind::Other(value),
        }
    }
}

impl From<MemoryKind> for String {
    fn from(kind: MemoryKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque record payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryContent {
    Text(String),
    Structured(serde_json::Value),
}

impl MemoryContent {
    /// Text used for embedding and display
    pub fn as_text(&self) -> String {
        match self {
            MemoryContent::Text(text) => text.clone(),
            MemoryContent::Structured(value) => value.to_string(),
        }
    }
}

impl From<&str> for MemoryContent {
    fn from(value: &str) -> Self {
        MemoryContent::Text(value.to_string())
    }
}

impl From<String> for MemoryContent {
    fn from(value: String) -> Self {
        MemoryContent::Text(value)
    }
}

impl From<serde_json::Value> for MemoryContent {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => MemoryContent::Text(text),
            other => MemoryContent::Structured(other),
        }
    }
}

/// Well-known metadata carried by every record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// Set once consolidation promoted the record; never reset
    #[serde(default)]
    pub consolidated: bool,

    /// Recursion depth of the write that produced this copy
    #[serde(default)]
    pub sync_depth: u32,

    /// `Some(true)` when the copy was written by cross-tier sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Concept name override used when the record is consolidated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_type: Option<String>,

    /// Declared relationships (concept names)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl MemoryMetadata {
    pub fn is_synced(&self) -> bool {
        self.synced == Some(true)
    }
}

/// A unit of agent memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub content: MemoryContent,
    pub kind: MemoryKind,
    pub tier: Tier,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MemoryMetadata,
}

impl MemoryRecord {
    /// Create an unconsolidated episodic record
    pub fn new(content: impl Into<MemoryContent>, kind: MemoryKind) -> Self {
        let now = Utc::now();
        Self {
            id: MemoryId::new(),
            content: content.into(),
            kind,
            tier: Tier::Episodic,
            importance: 0.5,
            created_at: now,
            updated_at: now,
            metadata: MemoryMetadata::default(),
        }
    }

    pub fn with_id(mut self, id: MemoryId) -> Self {
        self.id = id;
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Importance is clamped into 0..=1; NaN becomes 0
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = clamp_unit(importance);
        self
    }

    pub fn with_metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Reject records that must never reach a backend
    pub fn validate(&self) -> Result<(), MemoryError> {
        if let MemoryContent::Text(text) = &self.content {
            if text.trim().is_empty() {
                return Err(MemoryError::Validation(format!(
                    "record {} has empty content",
                    self.id
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(MemoryError::Validation(format!(
                "record {} importance {} outside 0..=1",
                self.id, self.importance
            )));
        }
        if self.metadata.related.iter().any(|name| name.trim().is_empty()) {
            return Err(MemoryError::Validation(format!(
                "record {} declares an empty relationship",
                self.id
            )));
        }
        Ok(())
    }

    /// Same identity and payload, used for write deduplication
    pub fn same_payload(&self, content: &MemoryContent, kind: &MemoryKind) -> bool {
        &self.content == content && &self.kind == kind
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_unknown_values() {
        let kind: MemoryKind = serde_json::from_str("\"reflection\"").unwrap();
        assert_eq!(kind, MemoryKind::Other("reflection".to_string()));
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"reflection\"");

        let known: MemoryKind = serde_json::from_str("\"task_update\"").unwrap();
        assert_eq!(known, MemoryKind::TaskUpdate);
    }

    #[test]
    fn test_importance_is_clamped() {
        let record = MemoryRecord::new("hello", MemoryKind::Interaction).with_importance(4.2);
        assert_eq!(record.importance, 1.0);

        let record = record.with_importance(f64::NAN);
        assert_eq!(record.importance, 0.0);
    }

    #[test]
    fn test_validate_rejects_empty_content() {
        let record = MemoryRecord::new("   ", MemoryKind::Interaction);
        assert!(matches!(record.validate(), Err(MemoryError::Validation(_))));
    }

    #[test]
    fn test_metadata_serialization_skips_empty_fields() {
        let record = MemoryRecord::new("hello", MemoryKind::Thread);
        let json = serde_json::to_value(&record).unwrap();
        let metadata = json.get("metadata").unwrap();

        assert_eq!(metadata.get("consolidated").unwrap(), false);
        assert_eq!(metadata.get("sync_depth").unwrap(), 0);
        assert!(metadata.get("synced").is_none());
        assert!(metadata.get("related").is_none());
    }

    #[test]
    fn test_structured_content_round_trip() {
        let content = MemoryContent::from(serde_json::json!({"task": "deploy", "step": 2}));
        let record = MemoryRecord::new(content.clone(), MemoryKind::TaskUpdate);

        let json = serde_json::to_string(&record).unwrap();
        let parsed: MemoryRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.content, content);
        assert_eq!(parsed.id, record.id);
    }

    #[test]
    fn test_memory_id_parse() {
        let id = MemoryId::new();
        let parsed: MemoryId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<MemoryId>().is_err());
    }
}
