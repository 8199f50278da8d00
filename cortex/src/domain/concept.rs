// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Concepts: the semantic-tier projection of a memory record
//!
//! A concept is keyed by `name` and upserted, never appended. Its `related`
//! set is the complete desired edge set: writing a concept replaces all of its
//! outgoing `RELATED_TO` edges. Names in `related` may point at concepts that
//! do not exist yet; the graph store creates those as stubs typed
//! [`PENDING_CONCEPT_TYPE`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::error::MemoryError;
use super::memory::{clamp_unit, MemoryId, MemoryRecord};

/// Type given to concepts created only because something relates to them
pub const PENDING_CONCEPT_TYPE: &str = "pending";

/// Type used when a record does not declare one
pub const DEFAULT_CONCEPT_TYPE: &str = "memory";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptValidation {
    /// Always within 0..=1
    pub confidence: f64,
    #[serde(default)]
    pub supported_by: Vec<String>,
    #[serde(default)]
    pub contradicted_by: Vec<String>,
    #[serde(default)]
    pub needs_verification: Vec<String>,
}

impl ConceptValidation {
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence: clamp_unit(confidence),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub name: String,
    pub concept_type: String,
    pub description: String,
    pub related: BTreeSet<String>,
    pub validation: ConceptValidation,
    pub importance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<MemoryId>,
    /// Record snapshot this concept was promoted from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<MemoryRecord>,
}

impl Concept {
    pub fn new(name: impl Into<String>, concept_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concept_type: concept_type.into(),
            description: String::new(),
            related: BTreeSet::new(),
            validation: ConceptValidation::new(1.0),
            importance: 0.5,
            thread_id: None,
            memory_id: None,
            source: None,
        }
    }

    /// Placeholder for a forward reference
    pub fn pending(name: impl Into<String>) -> Self {
        Self::new(name, PENDING_CONCEPT_TYPE)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_related<I, S>(mut self, related: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related = related.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.validation.confidence = clamp_unit(confidence);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.concept_type == PENDING_CONCEPT_TYPE
    }

    /// Project a record into the concept it consolidates into
    ///
    /// The name comes from `metadata.concept` when set, otherwise the record
    /// id, so a record always maps to the same concept.
    pub fn from_record(record: &MemoryRecord) -> Self {
        let metadata = &record.metadata;
        let name = metadata
            .concept
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| record.id.to_string());
        let concept_type = metadata
            .concept_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONCEPT_TYPE.to_string());
        let description = metadata
            .description
            .clone()
            .unwrap_or_else(|| record.content.as_text());

        let mut source = record.clone();
        source.tier = super::memory::Tier::Semantic;

        Self {
            related: metadata
                .related
                .iter()
                .filter(|related| **related != name)
                .cloned()
                .collect(),
            name,
            concept_type,
            description,
            validation: ConceptValidation::new(record.importance),
            importance: record.importance,
            thread_id: metadata.thread_id.clone(),
            memory_id: Some(record.id),
            source: Some(source),
        }
    }

    /// Reject concepts that must never be written
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.name.trim().is_empty() {
            return Err(MemoryError::Validation("concept name cannot be empty".to_string()));
        }
        if self.concept_type.trim().is_empty() {
            return Err(MemoryError::Validation(format!(
                "concept '{}' has an empty type",
                self.name
            )));
        }
        if self.related.iter().any(|name| name.trim().is_empty()) {
            return Err(MemoryError::Validation(format!(
                "concept '{}' relates to an empty name",
                self.name
            )));
        }
        if self.related.contains(&self.name) {
            return Err(MemoryError::Validation(format!(
                "concept '{}' cannot relate to itself",
                self.name
            )));
        }
        if !(0.0..=1.0).contains(&self.validation.confidence) {
            return Err(MemoryError::Validation(format!(
                "concept '{}' confidence {} outside 0..=1",
                self.name, self.validation.confidence
            )));
        }
        Ok(())
    }
}

/// A concept that changed after some watermark, as reported by the graph store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptChange {
    pub name: String,
    pub concept_type: String,
    pub description: String,
    pub related: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<MemoryId>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::memory::{MemoryKind, MemoryMetadata, Tier};

    #[test]
    fn test_confidence_clamped() {
        let concept = Concept::new("rust", "language").with_confidence(1.7);
        assert_eq!(concept.validation.confidence, 1.0);
        let concept = concept.with_confidence(-0.2);
        assert_eq!(concept.validation.confidence, 0.0);
    }

    #[test]
    fn test_from_record_uses_metadata() {
        let metadata = MemoryMetadata {
            thread_id: Some("thread-7".to_string()),
            description: Some("Deploy runbook".to_string()),
            concept: Some("deployments".to_string()),
            related: vec!["kubernetes".to_string(), "deployments".to_string()],
            ..Default::default()
        };
        let record = MemoryRecord::new("kubectl apply", MemoryKind::Interaction)
            .with_importance(0.8)
            .with_metadata(metadata);

        let concept = Concept::from_record(&record);

        assert_eq!(concept.name, "deployments");
        assert_eq!(concept.description, "Deploy runbook");
        assert_eq!(concept.thread_id.as_deref(), Some("thread-7"));
        assert_eq!(concept.importance, 0.8);
        assert_eq!(concept.memory_id, Some(record.id));
        // Self references are dropped during projection
        assert_eq!(concept.related.len(), 1);
        assert!(concept.related.contains("kubernetes"));
        assert_eq!(concept.source.as_ref().unwrap().tier, Tier::Semantic);
        assert!(concept.validate().is_ok());
    }

    #[test]
    fn test_from_record_defaults_name_to_id() {
        let record = MemoryRecord::new("plain note", MemoryKind::Thread);
        let concept = Concept::from_record(&record);
        assert_eq!(concept.name, record.id.to_string());
        assert_eq!(concept.concept_type, DEFAULT_CONCEPT_TYPE);
        assert_eq!(concept.description, "plain note");
    }

    #[test]
    fn test_validate_rejects_malformed() {
        assert!(Concept::new("", "x").validate().is_err());
        assert!(Concept::new("a", "").validate().is_err());
        assert!(Concept::new("a", "x").with_related(["a"]).validate().is_err());
        assert!(Concept::new("a", "x").with_related([" "]).validate().is_err());
        assert!(Concept::pending("b").validate().is_ok());
    }
}
