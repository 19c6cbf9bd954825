//! On-disk record shape for the embeddings file.

use serde::{Deserialize, Serialize};

use mnemos_types::Id;

/// Where an embedded record came from.
///
/// The `source` tag partitions the index: conversation segments feed memory
/// retrieval, graph entities feed entity resolution. Searches filter on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EmbeddingMetadata {
    /// A memory-worthy segment lifted from a turn digest.
    Segment {
        turn_guid: Id,
        importance: u8,
        #[serde(default)]
        topics: Vec<String>,
    },
    /// The description of a knowledge-graph node.
    GraphEntity {
        entity_id: String,
        entity_name: String,
        entity_type: String,
    },
}

impl EmbeddingMetadata {
    pub fn is_segment(&self) -> bool {
        matches!(self, Self::Segment { .. })
    }

    pub fn is_graph_entity(&self) -> bool {
        matches!(self, Self::GraphEntity { .. })
    }

    /// Entity type, for `graph_entity` records.
    pub fn entity_type(&self) -> Option<&str> {
        match self {
            Self::GraphEntity { entity_type, .. } => Some(entity_type),
            Self::Segment { .. } => None,
        }
    }
}

/// One line of the JSONL embeddings file. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: EmbeddingMetadata,
}
