//! Domain configuration.

use serde::{Deserialize, Serialize};

fn default_similarity_threshold() -> f32 {
    0.8
}

fn default_recent_window() -> usize {
    8
}

fn default_importance_threshold() -> u8 {
    3
}

fn default_enabled() -> bool {
    true
}

fn default_relationship_types() -> Vec<String> {
    [
        "located_in",
        "contains",
        "owns",
        "member_of",
        "knows",
        "allies_with",
        "enemies_with",
        "uses",
        "created_by",
        "related_to",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Explicit configuration record for one domain.
///
/// Replaces the loosely-typed config dictionaries of earlier designs: every
/// knob the pipeline consults is a named field with a serde default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub domain_name: String,
    /// Free text used verbatim as `static_memory` at session creation.
    #[serde(default)]
    pub initial_data: String,
    /// Closed set of entity types the extractor may emit.
    #[serde(default)]
    pub entity_types: Vec<String>,
    /// Closed set of relationship labels; defaults to a domain-generic set.
    #[serde(default = "default_relationship_types")]
    pub relationship_types: Vec<String>,
    /// Resolver auto-match threshold.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Whether the graph subsystem runs at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Number of recent turns kept verbatim before compression triggers.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
    /// Minimum segment importance (1..=5) for retention.
    #[serde(default = "default_importance_threshold")]
    pub importance_threshold: u8,
}

impl DomainConfig {
    /// Create a config with defaults for everything but the name.
    pub fn new(domain_name: impl Into<String>) -> Self {
        Self {
            domain_name: domain_name.into(),
            initial_data: String::new(),
            entity_types: Vec::new(),
            relationship_types: default_relationship_types(),
            similarity_threshold: default_similarity_threshold(),
            enabled: true,
            recent_window: default_recent_window(),
            importance_threshold: default_importance_threshold(),
        }
    }

    /// Set the static-memory seed text.
    pub fn with_initial_data(mut self, data: impl Into<String>) -> Self {
        self.initial_data = data.into();
        self
    }

    /// Set the closed entity-type set.
    pub fn with_entity_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the closed relationship-type set.
    pub fn with_relationship_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relationship_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the resolver auto-match threshold.
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Set the recent-turn window.
    pub fn with_recent_window(mut self, window: usize) -> Self {
        self.recent_window = window;
        self
    }

    /// True if `entity_type` is in the domain's closed set.
    pub fn is_valid_entity_type(&self, entity_type: &str) -> bool {
        self.entity_types.iter().any(|t| t == entity_type)
    }

    /// True if `relationship` is in the domain's closed set.
    pub fn is_valid_relationship(&self, relationship: &str) -> bool {
        self.relationship_types.iter().any(|r| r == relationship)
    }
}
