//! Graph node and edge types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use mnemos_types::{Id, Timestamp, new_id, now};

fn default_mention_count() -> u64 {
    1
}

/// Lowercase a name into an identifier-safe slug.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for c in name.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Mint a node ID of the form `<type>_<slug(name)>_<8-hex>`.
///
/// IDs are stable once minted and never reused.
pub fn node_id(entity_type: &str, name: &str) -> String {
    let hex = new_id().simple().to_string();
    format!("{entity_type}_{}_{}", slug(name), &hex[..8])
}

/// One entity in the knowledge graph.
///
/// Nodes are created by the resolver on a NEW verdict and mutated on a
/// MATCHED verdict. They are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_mention_count")]
    pub mention_count: u64,
    /// GUIDs of the turns this entity was mentioned in.
    #[serde(default)]
    pub conversation_history_guids: Vec<Id>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl GraphNode {
    /// Create a node with a freshly minted ID.
    pub fn new(
        entity_type: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let entity_type = entity_type.into();
        let name = name.into();
        let timestamp = now();
        Self {
            id: node_id(&entity_type, &name),
            name,
            entity_type,
            description: description.into(),
            attributes: BTreeMap::new(),
            aliases: Vec::new(),
            mention_count: 1,
            conversation_history_guids: Vec::new(),
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    fn touch(&mut self) {
        self.updated_at = now();
    }

    /// Record an alternative name, skipping the primary name and duplicates.
    pub fn add_alias(&mut self, alias: &str) {
        if alias.is_empty() || alias == self.name || self.aliases.iter().any(|a| a == alias) {
            return;
        }
        self.aliases.push(alias.to_string());
        self.touch();
    }

    /// Bump the mention counter and remember the turn it came from.
    pub fn record_mention(&mut self, turn_guid: Id) {
        self.mention_count += 1;
        if !self.conversation_history_guids.contains(&turn_guid) {
            self.conversation_history_guids.push(turn_guid);
        }
        self.touch();
    }

    /// Replace the description with a fresher one, if non-empty and different.
    pub fn refresh_description(&mut self, description: &str) {
        if description.is_empty() || description == self.description {
            return;
        }
        self.description = description.to_string();
        self.touch();
    }

    /// Case-insensitive match against the primary name and all aliases.
    pub fn matches_name(&self, name: &str) -> bool {
        let needle = name.to_lowercase();
        self.name.to_lowercase() == needle
            || self.aliases.iter().any(|a| a.to_lowercase() == needle)
    }
}

/// One directed, typed relationship between two nodes.
///
/// At most one edge exists per `(from_id, to_id, relationship)` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: Id,
    pub from_id: String,
    pub to_id: String,
    pub relationship: String,
    pub evidence: String,
    pub confidence: f32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl GraphEdge {
    pub fn new(
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        relationship: impl Into<String>,
        evidence: impl Into<String>,
        confidence: f32,
    ) -> Self {
        let timestamp = now();
        Self {
            id: new_id(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            relationship: relationship.into(),
            evidence: evidence.into(),
            confidence,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// True if this edge covers the same `(from, to, relationship)` triple.
    pub fn same_triple(&self, from_id: &str, to_id: &str, relationship: &str) -> bool {
        self.from_id == from_id && self.to_id == to_id && self.relationship == relationship
    }

    /// Merge a re-extraction of the same triple: confidence keeps the max,
    /// evidence and timestamp refresh.
    pub fn merge(&mut self, confidence: f32, evidence: &str) {
        self.confidence = self.confidence.max(confidence);
        if !evidence.is_empty() {
            self.evidence = evidence.to_string();
        }
        self.updated_at = now();
    }
}
