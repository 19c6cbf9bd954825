//! The graph manager: composes extraction, resolution, and relationship
//! tracking, and owns the node/edge maps.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use mnemos_embeddings::{EmbeddingMetadata, EmbeddingsIndex};
use mnemos_llm::SharedBackend;
use mnemos_store::{GraphMetadata, GraphStore};
use mnemos_types::{DomainConfig, Id};

use crate::error::Result;
use crate::extract::EntityExtractor;
use crate::model::{GraphEdge, GraphNode};
use crate::relations::{Relationship, RelationshipExtractor, ResolvedEntity};
use crate::resolve::EntityResolver;

// ─────────────────────────────────────────────────────────────────────────────
// Outcome Types
// ─────────────────────────────────────────────────────────────────────────────

/// Counters for one `process_turn` call.
#[derive(Debug, Clone, Default)]
pub struct ProcessStats {
    pub candidates: usize,
    pub entities_new: usize,
    pub entities_existing: usize,
    pub relationships_added: usize,
    pub relationships_merged: usize,
}

/// Everything `process_turn` did to the graph.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// All entities of the turn, resolved to node IDs, in candidate order.
    pub entities: Vec<ResolvedEntity>,
    pub relationships: Vec<Relationship>,
    pub new_entities: Vec<GraphNode>,
    pub existing_entities: Vec<GraphNode>,
    pub stats: ProcessStats,
}

/// One graph node returned from a context query.
#[derive(Debug, Clone)]
pub struct GraphHit {
    pub node: GraphNode,
    pub relevance_score: f32,
}

/// Graph context for answering a query.
#[derive(Debug, Clone)]
pub struct GraphContext {
    pub hits: Vec<GraphHit>,
    pub node_count: usize,
    pub edge_count: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

struct GraphState {
    nodes: BTreeMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
}

/// Owns the knowledge graph for one session.
///
/// The manager is the only writer to the graph store and to the
/// `graph_entity` partition of the embeddings index. Node and edge maps live
/// behind a lock that is never held across an LLM or embedder call.
pub struct GraphManager {
    store: GraphStore,
    index: Arc<EmbeddingsIndex>,
    extractor: EntityExtractor,
    resolver: EntityResolver,
    relationships: RelationshipExtractor,
    state: RwLock<GraphState>,
}

impl GraphManager {
    /// Open the graph under `dir`, loading persisted nodes and edges.
    ///
    /// Prompt templates resolve against `prompt_root` (the session root),
    /// falling back to the compiled-in defaults.
    pub fn open(
        dir: impl Into<PathBuf>,
        backend: SharedBackend,
        index: Arc<EmbeddingsIndex>,
        config: DomainConfig,
        prompt_root: &Path,
    ) -> Result<Self> {
        let store = GraphStore::open(dir)?;
        let nodes = store.load_nodes()?;
        let edges = store.load_edges()?;
        info!(nodes = nodes.len(), edges = edges.len(), "graph loaded");

        let extractor = EntityExtractor::new(backend.clone(), config.clone())
            .with_template(EntityExtractor::load_template(prompt_root));
        let resolver = EntityResolver::new(backend.clone(), config.similarity_threshold)
            .with_template(EntityResolver::load_template(prompt_root));
        let relationships = RelationshipExtractor::new(backend, config)
            .with_template(RelationshipExtractor::load_template(prompt_root));

        Ok(Self {
            store,
            index,
            extractor,
            resolver,
            relationships,
            state: RwLock::new(GraphState { nodes, edges }),
        })
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.state.read().edges.len()
    }

    /// Look up a node by ID.
    pub fn node(&self, id: &str) -> Option<GraphNode> {
        self.state.read().nodes.get(id).cloned()
    }

    /// Run the full extract-resolve-relate pipeline for one turn and persist
    /// the result.
    ///
    /// Extraction and resolution failures degrade stage by stage (no
    /// candidates, NEW verdicts, no relationships); only store and embedder
    /// errors surface, and never after nodes have been created.
    pub async fn process_turn(
        &self,
        turn_text: &str,
        digest_text: &str,
        turn_guid: Id,
    ) -> Result<ProcessOutcome> {
        let candidates = self.extractor.extract(turn_text, digest_text).await;
        let mut outcome = ProcessOutcome {
            stats: ProcessStats {
                candidates: candidates.len(),
                ..ProcessStats::default()
            },
            ..ProcessOutcome::default()
        };
        if candidates.is_empty() {
            return Ok(outcome);
        }

        let resolutions = self.resolver.resolve(&candidates, &self.index, None).await;

        for (candidate, resolution) in candidates.iter().zip(&resolutions) {
            // MATCHED path: mutate the existing node under a short lock.
            let matched_id = if resolution.auto_matched && !resolution.is_new() {
                let mut state = self.state.write();
                match state.nodes.get_mut(&resolution.resolved_node_id) {
                    Some(node) => {
                        node.record_mention(turn_guid);
                        node.add_alias(&candidate.name);
                        node.refresh_description(&candidate.description);
                        outcome.existing_entities.push(node.clone());
                        Some(node.id.clone())
                    }
                    None => {
                        warn!(
                            resolved = %resolution.resolved_node_id,
                            "resolver named a node that does not exist, creating new"
                        );
                        None
                    }
                }
            } else {
                None
            };

            let node_id = match matched_id {
                Some(id) => id,
                None => {
                    let mut node = GraphNode::new(
                        &candidate.entity_type,
                        &candidate.name,
                        &candidate.description,
                    );
                    node.conversation_history_guids.push(turn_guid);

                    // Index the description before the node becomes visible,
                    // so every node has exactly one graph_entity record.
                    self.index
                        .add(
                            &candidate.description,
                            EmbeddingMetadata::GraphEntity {
                                entity_id: node.id.clone(),
                                entity_name: node.name.clone(),
                                entity_type: node.entity_type.clone(),
                            },
                        )
                        .await?;

                    let id = node.id.clone();
                    outcome.new_entities.push(node.clone());
                    self.state.write().nodes.insert(id.clone(), node);
                    id
                }
            };
            outcome.entities.push(ResolvedEntity {
                node_id,
                name: candidate.name.clone(),
            });
        }

        let relationships = self
            .relationships
            .extract(turn_text, digest_text, &outcome.entities)
            .await;
        {
            let mut state = self.state.write();
            for rel in &relationships {
                match state.edges.iter_mut().find(|e| {
                    e.same_triple(&rel.from_entity_id, &rel.to_entity_id, &rel.relationship)
                }) {
                    Some(edge) => {
                        edge.merge(rel.confidence, &rel.evidence);
                        outcome.stats.relationships_merged += 1;
                    }
                    None => {
                        state.edges.push(GraphEdge::new(
                            &rel.from_entity_id,
                            &rel.to_entity_id,
                            &rel.relationship,
                            &rel.evidence,
                            rel.confidence,
                        ));
                        outcome.stats.relationships_added += 1;
                    }
                }
            }
        }

        outcome.relationships = relationships;
        outcome.stats.entities_new = outcome.new_entities.len();
        outcome.stats.entities_existing = outcome.existing_entities.len();

        self.persist()?;
        info!(
            candidates = outcome.stats.candidates,
            new = outcome.stats.entities_new,
            existing = outcome.stats.entities_existing,
            edges_added = outcome.stats.relationships_added,
            edges_merged = outcome.stats.relationships_merged,
            "processed turn into graph"
        );
        Ok(outcome)
    }

    /// Top-`k` graph nodes relevant to `query_text`.
    ///
    /// Semantic search over the `graph_entity` partition; if the embedder is
    /// unavailable, degrades to case-insensitive substring match over node
    /// names, aliases, and descriptions.
    pub async fn query_for_context(&self, query_text: &str, k: usize) -> GraphContext {
        let hits = match self
            .index
            .search_filtered(query_text, k, |m| m.is_graph_entity())
            .await
        {
            Ok(hits) => {
                let state = self.state.read();
                hits.into_iter()
                    .filter_map(|hit| match &hit.record.metadata {
                        EmbeddingMetadata::GraphEntity { entity_id, .. } => {
                            state.nodes.get(entity_id).map(|node| GraphHit {
                                node: node.clone(),
                                relevance_score: hit.score,
                            })
                        }
                        EmbeddingMetadata::Segment { .. } => None,
                    })
                    .collect()
            }
            Err(e) => {
                warn!(error = %e, "semantic graph query failed, falling back to substring match");
                self.substring_fallback(query_text, k)
            }
        };

        let state = self.state.read();
        GraphContext {
            hits,
            node_count: state.nodes.len(),
            edge_count: state.edges.len(),
        }
    }

    fn substring_fallback(&self, query_text: &str, k: usize) -> Vec<GraphHit> {
        let needle = query_text.to_lowercase();
        let state = self.state.read();
        state
            .nodes
            .values()
            .filter(|node| {
                node.name.to_lowercase().contains(&needle)
                    || node.description.to_lowercase().contains(&needle)
                    || node.aliases.iter().any(|a| a.to_lowercase().contains(&needle))
            })
            .take(k)
            .map(|node| GraphHit {
                node: node.clone(),
                relevance_score: 0.0,
            })
            .collect()
    }

    /// Write nodes, edges, and metadata to the store.
    pub fn persist(&self) -> Result<()> {
        let state = self.state.read();
        self.store.save_nodes(&state.nodes)?;
        self.store.save_edges(&state.edges)?;
        self.store
            .save_meta(&GraphMetadata::new(state.nodes.len(), state.edges.len()))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use mnemos_llm::MockBackend;
    use mnemos_types::new_id;

    fn config() -> DomainConfig {
        DomainConfig::new("test").with_entity_types(["character", "location"])
    }

    fn manager_with_replies<I, S>(dir: &Path, replies: I) -> GraphManager
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend: SharedBackend = Arc::new(MockBackend::new(replies));
        let index = Arc::new(
            EmbeddingsIndex::open(dir.join("embeddings.jsonl"), backend.clone()).unwrap(),
        );
        GraphManager::open(dir.join("graph_data"), backend, index, config(), dir).unwrap()
    }

    const EXTRACT_TWO: &str = r#"[
        {"type": "character", "name": "Elena", "description": "a cartographer from the isles", "confidence": 0.9},
        {"type": "location", "name": "Haven", "description": "a fortified port town", "confidence": 0.9}
    ]"#;

    #[tokio::test]
    async fn test_process_turn_creates_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_replies(
            dir.path(),
            [
                EXTRACT_TWO,
                r#"[["candidate_1", "<NEW>", "nothing similar", 0.9]]"#,
                r#"[["candidate_2", "<NEW>", "nothing similar", 0.9]]"#,
                "[]",
            ],
        );

        let outcome = manager
            .process_turn("Elena arrived in Haven.", "", new_id())
            .await
            .unwrap();

        assert_eq!(outcome.stats.candidates, 2);
        assert_eq!(outcome.stats.entities_new, 2);
        assert_eq!(outcome.stats.entities_existing, 0);
        assert_eq!(manager.node_count(), 2);
        assert!(outcome.new_entities[0].id.starts_with("character_elena_"));

        // Persisted to disk.
        assert!(dir.path().join("graph_data").join("graph_nodes.json").exists());
        assert!(dir.path().join("graph_data").join("graph_metadata.json").exists());
    }

    #[tokio::test]
    async fn test_matched_resolution_bumps_existing_node() {
        let dir = tempfile::tempdir().unwrap();
        let first = manager_with_replies(
            dir.path(),
            [
                EXTRACT_TWO,
                r#"[["candidate_1", "<NEW>", "new", 0.9]]"#,
                r#"[["candidate_2", "<NEW>", "new", 0.9]]"#,
                "[]",
            ],
        );
        let outcome = first.process_turn("Elena arrived in Haven.", "", new_id()).await.unwrap();
        let elena_id = outcome.new_entities[0].id.clone();

        // A second manager over the same directory sees the persisted graph.
        let resolve_match = format!(r#"[["candidate_1", "{elena_id}", "same person", 0.95]]"#);
        let second = manager_with_replies(
            dir.path(),
            [
                r#"[{"type": "character", "name": "The Mapmaker", "description": "Elena, who draws maps"}]"#,
                &resolve_match,
            ],
        );

        let guid = new_id();
        let outcome = second.process_turn("The Mapmaker returned.", "", guid).await.unwrap();
        assert_eq!(outcome.stats.entities_existing, 1);
        assert_eq!(outcome.stats.entities_new, 0);

        let node = second.node(&elena_id).unwrap();
        assert_eq!(node.mention_count, 2);
        assert!(node.conversation_history_guids.contains(&guid));
        assert!(node.aliases.contains(&"The Mapmaker".to_string()));
        // Description refreshed by the matched candidate.
        assert_eq!(node.description, "Elena, who draws maps");
    }

    #[tokio::test]
    async fn test_missing_resolved_id_demotes_to_new() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_replies(
            dir.path(),
            [
                r#"[{"type": "character", "name": "Elena", "description": "a cartographer"}]"#,
                r#"[["candidate_1", "character_ghost_deadbeef", "looks right", 0.99]]"#,
            ],
        );

        let outcome = manager.process_turn("Elena spoke.", "", new_id()).await.unwrap();
        assert_eq!(outcome.stats.entities_new, 1);
        assert_eq!(outcome.stats.entities_existing, 0);
    }

    #[tokio::test]
    async fn test_edge_merge_keeps_max_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let first = manager_with_replies(
            dir.path(),
            [
                EXTRACT_TWO,
                r#"[["candidate_1", "<NEW>", "new", 0.9]]"#,
                r#"[["candidate_2", "<NEW>", "new", 0.9]]"#,
                "[]",
            ],
        );
        let outcome = first.process_turn("Elena arrived in Haven.", "", new_id()).await.unwrap();
        let elena_id = outcome.new_entities[0].id.clone();
        let haven_id = outcome.new_entities[1].id.clone();

        let resolve_elena = format!(r#"[["candidate_1", "{elena_id}", "same", 0.95]]"#);
        let resolve_haven = format!(r#"[["candidate_2", "{haven_id}", "same", 0.95]]"#);
        let edge_strong = format!(
            r#"[{{"from_entity_id": "{elena_id}", "to_entity_id": "{haven_id}", "relationship": "located_in", "confidence": 0.6, "evidence": "she lives there"}}]"#
        );
        let edge_weak = format!(
            r#"[{{"from_entity_id": "{elena_id}", "to_entity_id": "{haven_id}", "relationship": "located_in", "confidence": 0.3, "evidence": "mentioned again"}}]"#
        );

        let second = manager_with_replies(
            dir.path(),
            [
                EXTRACT_TWO,
                resolve_elena.as_str(),
                resolve_haven.as_str(),
                edge_strong.as_str(),
                EXTRACT_TWO,
                resolve_elena.as_str(),
                resolve_haven.as_str(),
                edge_weak.as_str(),
            ],
        );

        let outcome = second.process_turn("Elena lives in Haven.", "", new_id()).await.unwrap();
        assert_eq!(outcome.stats.relationships_added, 1);

        let outcome = second.process_turn("Elena, of Haven.", "", new_id()).await.unwrap();
        assert_eq!(outcome.stats.relationships_added, 0);
        assert_eq!(outcome.stats.relationships_merged, 1);

        // One edge, confidence kept at the max, evidence refreshed.
        assert_eq!(second.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_relationship_failure_still_persists_new_nodes() {
        let dir = tempfile::tempdir().unwrap();
        // Three replies: extraction and both resolutions succeed, then the
        // queue is exhausted and the relationship call fails.
        let manager = manager_with_replies(
            dir.path(),
            [
                EXTRACT_TWO,
                r#"[["candidate_1", "<NEW>", "new", 0.9]]"#,
                r#"[["candidate_2", "<NEW>", "new", 0.9]]"#,
            ],
        );

        let outcome = manager
            .process_turn("Elena arrived in Haven.", "", new_id())
            .await
            .unwrap();

        assert_eq!(outcome.stats.entities_new, 2);
        assert!(outcome.relationships.is_empty());
        assert_eq!(manager.node_count(), 2);
        assert_eq!(manager.edge_count(), 0);
        // Nodes reached disk even though the relationship stage failed, so
        // the embeddings records written for them stay resolvable.
        assert!(dir.path().join("graph_data").join("graph_nodes.json").exists());

        let reopened = manager_with_replies(dir.path(), Vec::<String>::new());
        assert_eq!(reopened.node_count(), 2);
    }

    #[tokio::test]
    async fn test_query_for_context_returns_relevant_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_replies(
            dir.path(),
            [
                EXTRACT_TWO,
                r#"[["candidate_1", "<NEW>", "new", 0.9]]"#,
                r#"[["candidate_2", "<NEW>", "new", 0.9]]"#,
                "[]",
            ],
        );
        manager.process_turn("Elena arrived in Haven.", "", new_id()).await.unwrap();

        let context = manager.query_for_context("cartographer from the isles", 1).await;
        assert_eq!(context.node_count, 2);
        assert_eq!(context.hits.len(), 1);
        assert_eq!(context.hits[0].node.name, "Elena");
        assert!(context.hits[0].relevance_score > 0.0);
    }

    #[tokio::test]
    async fn test_query_falls_back_to_substring_match() {
        let dir = tempfile::tempdir().unwrap();
        // Build a graph first with a working backend.
        let manager = manager_with_replies(
            dir.path(),
            [
                EXTRACT_TWO,
                r#"[["candidate_1", "<NEW>", "new", 0.9]]"#,
                r#"[["candidate_2", "<NEW>", "new", 0.9]]"#,
                "[]",
            ],
        );
        manager.process_turn("Elena arrived in Haven.", "", new_id()).await.unwrap();

        // Reopen with an embed-failing backend over the same files.
        let failing: SharedBackend = Arc::new(MockBackend::failing_embed(Vec::<String>::new()));
        let index = Arc::new(
            EmbeddingsIndex::open(dir.path().join("embeddings.jsonl"), failing.clone()).unwrap(),
        );
        let degraded = GraphManager::open(
            dir.path().join("graph_data"),
            failing,
            index,
            config(),
            dir.path(),
        )
        .unwrap();

        let context = degraded.query_for_context("elena", 5).await;
        assert_eq!(context.hits.len(), 1);
        assert_eq!(context.hits[0].node.name, "Elena");
        assert_eq!(context.hits[0].relevance_score, 0.0);
    }

    #[tokio::test]
    async fn test_every_new_node_has_one_embedding_record() {
        let dir = tempfile::tempdir().unwrap();
        let backend: SharedBackend = Arc::new(MockBackend::new([
            EXTRACT_TWO,
            r#"[["candidate_1", "<NEW>", "new", 0.9]]"#,
            r#"[["candidate_2", "<NEW>", "new", 0.9]]"#,
            "[]",
        ]));
        let index = Arc::new(
            EmbeddingsIndex::open(dir.path().join("embeddings.jsonl"), backend.clone()).unwrap(),
        );
        let manager = GraphManager::open(
            dir.path().join("graph_data"),
            backend,
            index.clone(),
            config(),
            dir.path(),
        )
        .unwrap();

        manager.process_turn("Elena arrived in Haven.", "", new_id()).await.unwrap();
        assert_eq!(index.len(), 2);
    }
}
