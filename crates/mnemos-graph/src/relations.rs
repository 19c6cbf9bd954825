//! Relationship extraction between resolved entities.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use mnemos_llm::{GenerateRequest, PromptTemplate, SharedBackend, extract_json_array};
use mnemos_types::DomainConfig;

const DEFAULT_TEMPLATE: &str = include_str!("../prompts/relationship_extraction.prompt");

const DEFAULT_EVIDENCE: &str = "Inferred from context";
const DEFAULT_CONFIDENCE: f32 = 0.5;

/// An entity as handed to the relationship extractor: already resolved to a
/// node ID.
#[derive(Debug, Clone)]
pub struct ResolvedEntity {
    pub node_id: String,
    pub name: String,
}

/// One extracted relationship between two resolved entities.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub from_entity_id: String,
    pub to_entity_id: String,
    pub relationship: String,
    pub confidence: f32,
    pub evidence: String,
}

/// Extracts typed relationships among a turn's resolved entities.
pub struct RelationshipExtractor {
    backend: SharedBackend,
    config: DomainConfig,
    template: PromptTemplate,
}

impl RelationshipExtractor {
    pub fn new(backend: SharedBackend, config: DomainConfig) -> Self {
        Self {
            backend,
            config,
            template: PromptTemplate::from_text(DEFAULT_TEMPLATE),
        }
    }

    /// Replace the built-in prompt template.
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// Load `prompts/relationship_extraction.prompt` under `root`, falling
    /// back to the built-in template.
    pub fn load_template(root: &std::path::Path) -> PromptTemplate {
        PromptTemplate::load_or_default(root, "relationship_extraction", DEFAULT_TEMPLATE)
    }

    /// Extract relationships among `entities`. Fewer than two entities can
    /// form no relationship, so the LLM is not called.
    ///
    /// Infallible: an LLM or parse failure yields an empty list. Node
    /// creation has already happened by the time this stage runs, and a bad
    /// reply here must not undo it.
    pub async fn extract(
        &self,
        turn_text: &str,
        digest_text: &str,
        entities: &[ResolvedEntity],
    ) -> Vec<Relationship> {
        if entities.len() < 2 {
            return Vec::new();
        }

        let relationship_types = self.config.relationship_types.join(", ");
        let entity_list = entities
            .iter()
            .map(|e| format!("  {} (\"{}\")", e.node_id, e.name))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = self.template.fill(&[
            ("relationship_types", &relationship_types),
            ("entities", &entity_list),
            ("turn_text", turn_text),
            ("digest_text", digest_text),
        ]);

        let reply = match self.backend.generate(GenerateRequest::new(prompt)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "relationship extraction LLM call failed");
                return Vec::new();
            }
        };
        match extract_json_array(&reply) {
            Ok(parsed) => self.validate(parsed, entities),
            Err(e) => {
                warn!(error = %e, raw = %reply, "unparseable relationship extraction reply");
                Vec::new()
            }
        }
    }

    /// Keep relationships whose endpoints are both in the input list and
    /// whose label is in the domain's closed set. Duplicates within one call
    /// collapse by `(from, relationship, to)`.
    fn validate(&self, parsed: Value, entities: &[ResolvedEntity]) -> Vec<Relationship> {
        let known_ids: HashSet<&str> = entities.iter().map(|e| e.node_id.as_str()).collect();
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        let mut relationships = Vec::new();

        for item in parsed.as_array().into_iter().flatten() {
            let from = item["from_entity_id"].as_str().unwrap_or("").to_string();
            let to = item["to_entity_id"].as_str().unwrap_or("").to_string();
            let relationship = item["relationship"].as_str().unwrap_or("").to_string();

            if !known_ids.contains(from.as_str()) || !known_ids.contains(to.as_str()) {
                debug!(%from, %to, "dropping relationship with unknown endpoint");
                continue;
            }
            if !self.config.is_valid_relationship(&relationship) {
                debug!(%relationship, "dropping relationship with unknown label");
                continue;
            }
            if !seen.insert((from.clone(), relationship.clone(), to.clone())) {
                continue;
            }

            let confidence = item["confidence"]
                .as_f64()
                .map(|c| c as f32)
                .unwrap_or(DEFAULT_CONFIDENCE)
                .clamp(0.0, 1.0);
            let evidence = match item["evidence"].as_str() {
                Some(e) if !e.trim().is_empty() => e.to_string(),
                _ => DEFAULT_EVIDENCE.to_string(),
            };

            relationships.push(Relationship {
                from_entity_id: from,
                to_entity_id: to,
                relationship,
                confidence,
                evidence,
            });
        }
        relationships
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mnemos_llm::MockBackend;

    fn entities() -> Vec<ResolvedEntity> {
        vec![
            ResolvedEntity {
                node_id: "character_elena_0".to_string(),
                name: "Elena".to_string(),
            },
            ResolvedEntity {
                node_id: "location_haven_0".to_string(),
                name: "Haven".to_string(),
            },
        ]
    }

    fn config() -> DomainConfig {
        DomainConfig::new("test")
    }

    #[tokio::test]
    async fn test_extracts_valid_relationship() {
        let reply = r#"[{"from_entity_id": "character_elena_0", "to_entity_id": "location_haven_0", "relationship": "located_in", "confidence": 0.9, "evidence": "Elena lives in Haven"}]"#;
        let backend: SharedBackend = Arc::new(MockBackend::new([reply]));
        let extractor = RelationshipExtractor::new(backend, config());

        let rels = extractor.extract("Elena lives in Haven.", "", &entities()).await;
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relationship, "located_in");
        assert_eq!(rels[0].evidence, "Elena lives in Haven");
    }

    #[tokio::test]
    async fn test_single_entity_skips_llm() {
        let backend = Arc::new(MockBackend::new(Vec::<String>::new()));
        let extractor = RelationshipExtractor::new(backend.clone(), config());

        let one = vec![ResolvedEntity {
            node_id: "character_elena_0".to_string(),
            name: "Elena".to_string(),
        }];
        let rels = extractor.extract("text", "", &one).await;
        assert!(rels.is_empty());
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_llm_failure_yields_no_relationships() {
        let backend: SharedBackend = Arc::new(MockBackend::failing_generate());
        let extractor = RelationshipExtractor::new(backend, config());
        assert!(extractor.extract("text", "", &entities()).await.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_reply_yields_no_relationships() {
        let backend: SharedBackend = Arc::new(MockBackend::new(["I see no relationships."]));
        let extractor = RelationshipExtractor::new(backend, config());
        assert!(extractor.extract("text", "", &entities()).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_endpoint_and_label_dropped() {
        let reply = r#"[
            {"from_entity_id": "character_elena_0", "to_entity_id": "character_ghost_9", "relationship": "knows"},
            {"from_entity_id": "character_elena_0", "to_entity_id": "location_haven_0", "relationship": "haunts"}
        ]"#;
        let backend: SharedBackend = Arc::new(MockBackend::new([reply]));
        let extractor = RelationshipExtractor::new(backend, config());

        let rels = extractor.extract("text", "", &entities()).await;
        assert!(rels.is_empty());
    }

    #[tokio::test]
    async fn test_defaults_and_dedup() {
        let reply = r#"[
            {"from_entity_id": "character_elena_0", "to_entity_id": "location_haven_0", "relationship": "located_in"},
            {"from_entity_id": "character_elena_0", "to_entity_id": "location_haven_0", "relationship": "located_in", "confidence": 0.99}
        ]"#;
        let backend: SharedBackend = Arc::new(MockBackend::new([reply]));
        let extractor = RelationshipExtractor::new(backend, config());

        let rels = extractor.extract("text", "", &entities()).await;
        // Duplicate (from, rel, to) collapses to the first occurrence.
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].confidence, 0.5);
        assert_eq!(rels[0].evidence, "Inferred from context");
    }
}
