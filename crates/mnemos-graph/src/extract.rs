//! Candidate entity extraction.

use serde_json::Value;
use tracing::{debug, warn};

use mnemos_llm::{GenerateRequest, PromptTemplate, SharedBackend, extract_json_array};
use mnemos_types::DomainConfig;

const DEFAULT_TEMPLATE: &str = include_str!("../prompts/entity_extraction.prompt");

/// An entity proposed by the extractor, not yet resolved against the graph.
#[derive(Debug, Clone)]
pub struct EntityCandidate {
    /// Positional identifier (`candidate_1`, `candidate_2`, ...) used to
    /// correlate resolver output with input.
    pub candidate_id: String,
    pub entity_type: String,
    pub name: String,
    pub description: String,
    pub confidence: f32,
}

/// Extracts candidate entities from a turn.
///
/// Stateless with respect to the graph: it proposes candidates, the resolver
/// decides whether they are new.
pub struct EntityExtractor {
    backend: SharedBackend,
    config: DomainConfig,
    template: PromptTemplate,
}

impl EntityExtractor {
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

    /// Load `prompts/entity_extraction.prompt` under `root`, falling back to
    /// the built-in template.
    pub fn load_template(root: &std::path::Path) -> PromptTemplate {
        PromptTemplate::load_or_default(root, "entity_extraction", DEFAULT_TEMPLATE)
    }

    /// Extract and validate candidates for one turn.
    ///
    /// Infallible: an LLM or parse failure yields no candidates, so the rest
    /// of the graph pipeline still runs for the turn.
    pub async fn extract(&self, turn_text: &str, digest_text: &str) -> Vec<EntityCandidate> {
        let entity_types = self.config.entity_types.join(", ");
        let prompt = self.template.fill(&[
            ("entity_types", &entity_types),
            ("turn_text", turn_text),
            ("digest_text", digest_text),
        ]);

        let reply = match self.backend.generate(GenerateRequest::new(prompt)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "entity extraction LLM call failed");
                return Vec::new();
            }
        };
        match extract_json_array(&reply) {
            Ok(parsed) => self.validate(parsed),
            Err(e) => {
                warn!(error = %e, raw = %reply, "unparseable entity extraction reply");
                Vec::new()
            }
        }
    }

    /// Keep only candidates with a taxonomy type, a name, and a description.
    fn validate(&self, parsed: Value) -> Vec<EntityCandidate> {
        let Some(items) = parsed.as_array() else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        for item in items {
            let entity_type = item["type"].as_str().unwrap_or("").trim().to_string();
            let name = item["name"].as_str().unwrap_or("").trim().to_string();
            let description = item["description"].as_str().unwrap_or("").trim().to_string();

            if !self.config.is_valid_entity_type(&entity_type) {
                debug!(%entity_type, %name, "dropping candidate with unknown type");
                continue;
            }
            if name.is_empty() || description.is_empty() {
                debug!(%entity_type, "dropping candidate with empty name or description");
                continue;
            }

            let confidence = item["confidence"].as_f64().unwrap_or(1.0) as f32;
            candidates.push(EntityCandidate {
                candidate_id: format!("candidate_{}", candidates.len() + 1),
                entity_type,
                name,
                description,
                confidence: confidence.clamp(0.0, 1.0),
            });
        }
        candidates
    }
}
