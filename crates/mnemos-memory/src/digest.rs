//! Per-turn digest generation.

use serde_json::Value;
use tracing::warn;

use mnemos_llm::{
    GenerateRequest, PromptTemplate, Result as LlmResult, SharedBackend, extract_json_object,
};
use mnemos_types::{Digest, RatedSegment, SegmentType, Turn};

const DEFAULT_TEMPLATE: &str = include_str!("../prompts/digest_generation.prompt");

/// Segments a turn into importance-rated statements via the LLM.
///
/// Infallible by design: an LLM or parse failure yields an empty digest
/// flagged `parse_error`, and the turn is persisted either way.
pub struct DigestGenerator {
    backend: SharedBackend,
    template: PromptTemplate,
}

impl DigestGenerator {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            template: PromptTemplate::from_text(DEFAULT_TEMPLATE),
        }
    }

    /// Replace the built-in prompt template.
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// Load `prompts/digest_generation.prompt` under `root`, falling back to
    /// the built-in template.
    pub fn load_template(root: &std::path::Path) -> PromptTemplate {
        PromptTemplate::load_or_default(root, "digest_generation", DEFAULT_TEMPLATE)
    }

    /// Produce a digest for one turn.
    pub async fn generate(&self, turn: &Turn) -> Digest {
        let prompt = self.template.fill(&[
            ("role", turn.role.label()),
            ("content", &turn.content),
        ]);

        let reply = match self.backend.generate(GenerateRequest::new(prompt)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(turn = %turn.guid, error = %e, "digest generation failed");
                return Digest::parse_failed();
            }
        };

        match parse_digest(&reply) {
            Ok(digest) => digest,
            Err(e) => {
                warn!(turn = %turn.guid, error = %e, raw = %reply, "digest reply unparseable");
                Digest::parse_failed()
            }
        }
    }
}

/// Parse and validate a digest reply.
///
/// Per-segment rules: empty text or non-numeric importance drops the
/// segment; out-of-range importance clamps to 1..=5; an unknown type coerces
/// to `information`.
fn parse_digest(reply: &str) -> LlmResult<Digest> {
    let value = extract_json_object(reply)?;

    let mut segments = Vec::new();
    for item in value["rated_segments"].as_array().into_iter().flatten() {
        let text = item["text"].as_str().unwrap_or("").trim().to_string();
        if text.is_empty() {
            continue;
        }
        let Some(importance) = item["importance"].as_f64() else {
            continue;
        };
        let topics = item["topics"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        segments.push(RatedSegment {
            text,
            segment_type: SegmentType::from_str_lossy(item["type"].as_str().unwrap_or("")),
            importance: importance.round().clamp(1.0, 5.0) as u8,
            topics,
            memory_worthy: item["memory_worthy"].as_bool().unwrap_or(false),
        });
    }

    Ok(Digest {
        rated_segments: segments,
        parse_error: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mnemos_llm::MockBackend;

    #[tokio::test]
    async fn test_generates_rated_segments() {
        let reply = r#"{"rated_segments": [
            {"text": "the harbor froze", "type": "information", "importance": 4, "topics": ["harbor"], "memory_worthy": true},
            {"text": "what time is it?", "type": "query", "importance": 1, "topics": [], "memory_worthy": false}
        ]}"#;
        let backend: SharedBackend = Arc::new(MockBackend::new([reply]));
        let digester = DigestGenerator::new(backend);

        let digest = digester.generate(&Turn::user("The harbor froze. What time is it?")).await;
        assert!(!digest.parse_error);
        assert_eq!(digest.rated_segments.len(), 2);
        assert_eq!(digest.rated_segments[0].segment_type, SegmentType::Information);
        assert!(digest.rated_segments[0].memory_worthy);
    }

    #[tokio::test]
    async fn test_prompt_is_deterministic_and_labeled() {
        let backend = Arc::new(MockBackend::new([r#"{"rated_segments": []}"#]));
        let digester = DigestGenerator::new(backend.clone());

        digester.generate(&Turn::agent("noted")).await;

        let requests = backend.requests();
        assert_eq!(requests[0].temperature, 0.0);
        assert!(!requests[0].stream);
        assert!(requests[0].prompt.contains("AGENT"));
    }

    #[tokio::test]
    async fn test_validation_rules() {
        let reply = r#"{"rated_segments": [
            {"text": "", "type": "information", "importance": 3, "memory_worthy": true},
            {"text": "no importance", "type": "information", "importance": "high", "memory_worthy": true},
            {"text": "clamped", "type": "information", "importance": 9, "memory_worthy": true},
            {"text": "coerced", "type": "musing", "importance": 2, "memory_worthy": false}
        ]}"#;
        let backend: SharedBackend = Arc::new(MockBackend::new([reply]));
        let digest = DigestGenerator::new(backend).generate(&Turn::user("x")).await;

        assert_eq!(digest.rated_segments.len(), 2);
        assert_eq!(digest.rated_segments[0].importance, 5);
        assert_eq!(digest.rated_segments[1].segment_type, SegmentType::Information);
    }

    #[tokio::test]
    async fn test_unparseable_reply_flags_parse_error() {
        let backend: SharedBackend = Arc::new(MockBackend::new(["I cannot do that."]));
        let digest = DigestGenerator::new(backend).generate(&Turn::user("x")).await;
        assert!(digest.parse_error);
        assert!(digest.rated_segments.is_empty());
    }

    #[tokio::test]
    async fn test_llm_failure_flags_parse_error() {
        let backend: SharedBackend = Arc::new(MockBackend::failing_generate());
        let digest = DigestGenerator::new(backend).generate(&Turn::user("x")).await;
        assert!(digest.parse_error);
    }
}
