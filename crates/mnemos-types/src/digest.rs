//! Per-turn digests with importance-rated segments.

use serde::{Deserialize, Serialize};

/// Classification of a digest segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    Query,
    Information,
    Action,
    Command,
}

impl SegmentType {
    /// Parse a segment type from the LLM's string output.
    ///
    /// Unknown values coerce to `Information` per the digest validation rules.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "query" => SegmentType::Query,
            "action" => SegmentType::Action,
            "command" => SegmentType::Command,
            _ => SegmentType::Information,
        }
    }
}

/// A substring of a turn with an importance rating and topical tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatedSegment {
    pub text: String,
    #[serde(rename = "type")]
    pub segment_type: SegmentType,
    /// Importance on a 1..=5 scale.
    pub importance: u8,
    #[serde(default)]
    pub topics: Vec<String>,
    pub memory_worthy: bool,
}

impl RatedSegment {
    /// Whether downstream consumers (embeddings, compression) should keep this
    /// segment, given an importance threshold.
    pub fn is_retained(&self, importance_threshold: u8) -> bool {
        self.memory_worthy && self.importance >= importance_threshold
    }
}

/// Structured per-turn analysis produced by the LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Digest {
    #[serde(default)]
    pub rated_segments: Vec<RatedSegment>,
    /// Set when the LLM reply could not be parsed; the turn is persisted anyway.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parse_error: bool,
}

impl Digest {
    /// An empty digest flagged as a parse failure.
    pub fn parse_failed() -> Self {
        Self {
            rated_segments: Vec::new(),
            parse_error: true,
        }
    }

    /// Segments that pass the memory-worthiness and importance filters.
    pub fn retained_segments(&self, importance_threshold: u8) -> Vec<&RatedSegment> {
        self.rated_segments
            .iter()
            .filter(|s| s.is_retained(importance_threshold))
            .collect()
    }
}
