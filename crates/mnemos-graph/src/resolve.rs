//! Entity resolution against existing graph nodes.
//!
//! For each candidate the resolver retrieves nearby graph-entity embeddings,
//! shows them to the LLM alongside the candidate, and gets back either an
//! existing node ID or the `<NEW>` sentinel with a confidence score. The
//! resolver never fails a batch: any error degrades to a NEW verdict with
//! zero confidence, because duplicate nodes are recoverable and a crashed
//! pipeline is not.

use serde_json::Value;
use tracing::{debug, warn};

use mnemos_embeddings::{EmbeddingMetadata, EmbeddingsIndex};
use mnemos_llm::{GenerateRequest, PromptTemplate, Result as LlmResult, SharedBackend, extract_json_array};

use crate::extract::EntityCandidate;

const DEFAULT_TEMPLATE: &str = include_str!("../prompts/entity_resolution.prompt");

/// Verdict marker for "no existing node matches".
pub const NEW_SENTINEL: &str = "<NEW>";

/// RAG retrieval width before the per-type filter.
const RAG_SEARCH_K: usize = 5;
/// Existing nodes shown to the LLM per candidate.
const RAG_CONTEXT_LIMIT: usize = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// The resolver's verdict for one candidate.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub candidate_id: String,
    /// An existing node ID, or [`NEW_SENTINEL`].
    pub resolved_node_id: String,
    pub justification: String,
    pub confidence: f32,
    /// True when confidence cleared the threshold and the verdict names an
    /// existing node.
    pub auto_matched: bool,
}

impl Resolution {
    pub fn is_new(&self) -> bool {
        self.resolved_node_id == NEW_SENTINEL
    }

    fn fallback(candidate_id: &str, reason: &str) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            resolved_node_id: NEW_SENTINEL.to_string(),
            justification: format!("error: {reason}"),
            confidence: 0.0,
            auto_matched: false,
        }
    }
}

/// How a batch of candidates is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionMode {
    /// One LLM call per candidate, each with its own RAG context plus the
    /// batch's previous verdicts. Highest accuracy.
    #[default]
    Individual,
    /// One LLM call for the whole batch against the unioned RAG context.
    Batch,
}

/// An existing node as presented to the LLM.
#[derive(Debug, Clone)]
struct KnownEntity {
    node_id: String,
    entity_type: String,
    description: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────────────────

pub struct EntityResolver {
    backend: SharedBackend,
    template: PromptTemplate,
    threshold: f32,
    mode: ResolutionMode,
}

impl EntityResolver {
    pub fn new(backend: SharedBackend, threshold: f32) -> Self {
        Self {
            backend,
            template: PromptTemplate::from_text(DEFAULT_TEMPLATE),
            threshold,
            mode: ResolutionMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: ResolutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the built-in prompt template.
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// Load `prompts/entity_resolution.prompt` under `root`, falling back to
    /// the built-in template.
    pub fn load_template(root: &std::path::Path) -> PromptTemplate {
        PromptTemplate::load_or_default(root, "entity_resolution", DEFAULT_TEMPLATE)
    }

    /// Resolve every candidate. Infallible: errors become NEW verdicts with
    /// zero confidence. The output has one resolution per candidate, in
    /// candidate order.
    pub async fn resolve(
        &self,
        candidates: &[EntityCandidate],
        index: &EmbeddingsIndex,
        threshold_override: Option<f32>,
    ) -> Vec<Resolution> {
        let threshold = threshold_override.unwrap_or(self.threshold);
        match self.mode {
            ResolutionMode::Individual => {
                self.resolve_individually(candidates, index, threshold).await
            }
            ResolutionMode::Batch => self.resolve_batch(candidates, index, threshold).await,
        }
    }

    async fn resolve_individually(
        &self,
        candidates: &[EntityCandidate],
        index: &EmbeddingsIndex,
        threshold: f32,
    ) -> Vec<Resolution> {
        let mut resolutions = Vec::with_capacity(candidates.len());
        // Verdicts from earlier in the batch, so that a candidate referring
        // to a just-resolved entity converges on the same ID.
        let mut resolved_context: Vec<KnownEntity> = Vec::new();

        for candidate in candidates {
            let mut context = self.rag_context(index, candidate).await;
            context.extend(resolved_context.iter().cloned());

            let resolution = self.resolve_one(candidate, &context, threshold).await;
            if !resolution.is_new() {
                resolved_context.push(KnownEntity {
                    node_id: resolution.resolved_node_id.clone(),
                    entity_type: candidate.entity_type.clone(),
                    description: candidate.description.clone(),
                });
            }
            debug!(
                candidate = %candidate.candidate_id,
                resolved = %resolution.resolved_node_id,
                confidence = resolution.confidence,
                auto_matched = resolution.auto_matched,
                "resolved candidate"
            );
            resolutions.push(resolution);
        }
        resolutions
    }

    async fn resolve_one(
        &self,
        candidate: &EntityCandidate,
        context: &[KnownEntity],
        threshold: f32,
    ) -> Resolution {
        let prompt = self.build_prompt(std::slice::from_ref(candidate), context);
        let reply = match self.backend.generate(GenerateRequest::new(prompt)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(candidate = %candidate.candidate_id, error = %e, "resolution LLM call failed");
                return Resolution::fallback(&candidate.candidate_id, &e.to_string());
            }
        };

        match parse_resolutions(&reply) {
            Ok(mut parsed) if !parsed.is_empty() => {
                let mut resolution = parsed.remove(0);
                // Trust positional correlation over whatever ID the model echoed.
                resolution.candidate_id = candidate.candidate_id.clone();
                resolution.auto_matched = resolution.confidence >= threshold && !resolution.is_new();
                resolution
            }
            Ok(_) => Resolution::fallback(&candidate.candidate_id, "empty resolution list"),
            Err(e) => {
                warn!(candidate = %candidate.candidate_id, error = %e, "unparseable resolution reply");
                Resolution::fallback(&candidate.candidate_id, &e.to_string())
            }
        }
    }

    async fn resolve_batch(
        &self,
        candidates: &[EntityCandidate],
        index: &EmbeddingsIndex,
        threshold: f32,
    ) -> Vec<Resolution> {
        if candidates.is_empty() {
            return Vec::new();
        }

        // Union of per-candidate RAG contexts, deduplicated by node ID.
        let mut context: Vec<KnownEntity> = Vec::new();
        for candidate in candidates {
            for entity in self.rag_context(index, candidate).await {
                if !context.iter().any(|e| e.node_id == entity.node_id) {
                    context.push(entity);
                }
            }
        }

        let prompt = self.build_prompt(candidates, &context);
        let reply = match self.backend.generate(GenerateRequest::new(prompt)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "batch resolution LLM call failed");
                return candidates
                    .iter()
                    .map(|c| Resolution::fallback(&c.candidate_id, &e.to_string()))
                    .collect();
            }
        };

        let parsed = match parse_resolutions(&reply) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "unparseable batch resolution reply");
                return candidates
                    .iter()
                    .map(|c| Resolution::fallback(&c.candidate_id, &e.to_string()))
                    .collect();
            }
        };

        // Re-order by candidate; anything the LLM skipped falls back to NEW.
        candidates
            .iter()
            .map(|candidate| {
                parsed
                    .iter()
                    .find(|r| r.candidate_id == candidate.candidate_id)
                    .map(|r| {
                        let mut resolution = r.clone();
                        resolution.auto_matched =
                            resolution.confidence >= threshold && !resolution.is_new();
                        resolution
                    })
                    .unwrap_or_else(|| {
                        Resolution::fallback(&candidate.candidate_id, "not resolved by LLM")
                    })
            })
            .collect()
    }

    /// Nearest graph-entity records of the candidate's type.
    async fn rag_context(&self, index: &EmbeddingsIndex, candidate: &EntityCandidate) -> Vec<KnownEntity> {
        let query = format!("{} {}", candidate.name, candidate.description);
        if query.trim().is_empty() {
            return Vec::new();
        }

        let hits = match index
            .search_filtered(&query, RAG_SEARCH_K, |m| {
                m.entity_type() == Some(candidate.entity_type.as_str())
            })
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(candidate = %candidate.candidate_id, error = %e, "RAG lookup failed");
                return Vec::new();
            }
        };

        hits.into_iter()
            .take(RAG_CONTEXT_LIMIT)
            .filter_map(|hit| match hit.record.metadata {
                EmbeddingMetadata::GraphEntity { entity_id, .. } => Some(KnownEntity {
                    node_id: entity_id,
                    entity_type: candidate.entity_type.clone(),
                    description: hit.record.text,
                }),
                EmbeddingMetadata::Segment { .. } => None,
            })
            .collect()
    }

    fn build_prompt(&self, candidates: &[EntityCandidate], context: &[KnownEntity]) -> String {
        let mut existing = String::new();
        for entity in context {
            existing.push_str(&format!(
                "  existing_node_id: \"{}\"\n  type: \"{}\"\n  description: \"{}\"\n\n",
                entity.node_id, entity.entity_type, entity.description
            ));
        }
        if existing.is_empty() {
            existing.push_str("  (none)\n");
        }

        let candidate_json = serde_json::Value::Array(
            candidates
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "candidate_id": c.candidate_id,
                        "type": c.entity_type,
                        "description": c.description,
                    })
                })
                .collect(),
        );

        self.template.fill(&[
            ("existing_node_data", &existing),
            ("candidate_nodes", &candidate_json.to_string()),
        ])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reply Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a resolution reply, accepting array-of-tuples
/// (`[candidate_id, node_id, justification, confidence]`) and
/// array-of-objects shapes, with or without code fences.
fn parse_resolutions(reply: &str) -> LlmResult<Vec<Resolution>> {
    let value = extract_json_array(reply)?;
    let mut resolutions = Vec::new();

    for item in value.as_array().into_iter().flatten() {
        match item {
            Value::Array(tuple) if tuple.len() >= 2 => {
                resolutions.push(Resolution {
                    candidate_id: tuple[0].as_str().unwrap_or("").to_string(),
                    resolved_node_id: tuple[1].as_str().unwrap_or(NEW_SENTINEL).to_string(),
                    justification: tuple
                        .get(2)
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    confidence: tuple.get(3).and_then(Value::as_f64).unwrap_or(0.0) as f32,
                    auto_matched: false,
                });
            }
            Value::Object(map) => {
                let resolved = map
                    .get("resolved_node_id")
                    .or_else(|| map.get("existing_node_id"))
                    .and_then(Value::as_str)
                    .unwrap_or(NEW_SENTINEL);
                let justification = map
                    .get("resolution_justification")
                    .or_else(|| map.get("justification"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                resolutions.push(Resolution {
                    candidate_id: map
                        .get("candidate_id")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    resolved_node_id: resolved.to_string(),
                    justification: justification.to_string(),
                    confidence: map.get("confidence").and_then(Value::as_f64).unwrap_or(0.0)
                        as f32,
                    auto_matched: false,
                });
            }
            _ => {
                debug!("skipping malformed resolution element");
            }
        }
    }
    Ok(resolutions)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
