//! The memory manager: foreground API for one session.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use mnemos_embeddings::{EmbeddingsIndex, SearchHit};
use mnemos_graph::{GraphContext, GraphManager};
use mnemos_llm::{GenerateRequest, PromptTemplate, SharedBackend};
use mnemos_store::SessionStore;
use mnemos_types::{DomainConfig, Id, Role, SessionMemory, Turn, new_id};

use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::scheduler::{Scheduler, SchedulerStats};

const DEFAULT_QUERY_TEMPLATE: &str = include_str!("../prompts/query_memory.prompt");

/// Retrieval width for semantic and graph hits at query time.
const RETRIEVAL_K: usize = 5;
/// Reply generation samples; extraction prompts stay at temperature 0.
const REPLY_TEMPERATURE: f32 = 0.7;

const QUERY_ERROR_REPLY: &str = "Error processing query";

/// Foreground API for one session's memory.
///
/// Opened synchronous by default: every ingest stage runs inline in
/// `add_turn`. [`MemoryManager::with_background`] moves the stages onto the
/// scheduler's workers, after which the foreground never waits on them.
pub struct MemoryManager {
    pipeline: Arc<Pipeline>,
    scheduler: Option<Scheduler>,
    query_template: PromptTemplate,
}

impl MemoryManager {
    /// Open (or create) the session rooted at `root`.
    pub fn open(
        root: impl AsRef<Path>,
        backend: SharedBackend,
        config: DomainConfig,
    ) -> Result<Self> {
        let store = SessionStore::open(root.as_ref())?;
        let index = Arc::new(EmbeddingsIndex::open(
            store.embeddings_path(),
            backend.clone(),
        )?);

        let graph = if config.enabled {
            Some(GraphManager::open(
                store.graph_dir(),
                backend.clone(),
                index.clone(),
                config.clone(),
                store.root(),
            )?)
        } else {
            None
        };

        let memory = match store.load_memory()? {
            Some(memory) => memory,
            None => SessionMemory::new(new_id(), &config.initial_data),
        };
        let query_template =
            PromptTemplate::load_or_default(store.root(), "query_memory", DEFAULT_QUERY_TEMPLATE);

        info!(
            session = %memory.metadata.session_guid,
            turns = memory.conversation_history.len(),
            graph_enabled = graph.is_some(),
            "memory manager opened"
        );
        Ok(Self {
            pipeline: Arc::new(Pipeline::new(store, memory, index, graph, backend, config)),
            scheduler: None,
            query_template,
        })
    }

    /// Move ingest stages onto background workers. Requires a tokio runtime.
    pub fn with_background(mut self) -> Self {
        self.scheduler = Some(Scheduler::spawn(self.pipeline.clone()));
        self
    }

    #[cfg(test)]
    fn with_background_capacity(mut self, capacity: usize) -> Self {
        self.scheduler = Some(Scheduler::spawn_with_capacity(
            self.pipeline.clone(),
            capacity,
        ));
        self
    }

    /// Initialize the session memory with `seed_text`.
    ///
    /// Idempotent: if a snapshot is already on disk, nothing changes and
    /// `Ok(false)` is returned.
    pub fn create_initial_memory(&self, seed_text: &str) -> Result<bool> {
        if self.pipeline.store.load_memory()?.is_some() {
            return Ok(false);
        }
        let mut memory = self.pipeline.memory.lock();
        *memory = SessionMemory::new(new_id(), seed_text);
        self.pipeline.store.save_memory(&memory)?;
        Ok(true)
    }

    /// Append a turn, persist it, and run (or enqueue) the ingest pipeline.
    /// Returns the turn's GUID.
    pub async fn add_turn(&self, role: Role, content: &str) -> Result<Id> {
        let turn = Turn::new(role, content);
        let guid = turn.guid;
        {
            let mut memory = self.pipeline.memory.lock();
            memory.push_turn(turn.clone());
            self.pipeline.store.save_memory(&memory)?;
        }
        self.pipeline.store.append_turn_log(&turn)?;

        match &self.scheduler {
            Some(scheduler) => {
                // A full queue skips background work for this turn; the turn
                // itself is already durable.
                if let Err(e) = scheduler.enqueue_digest(guid) {
                    warn!(turn = %guid, error = %e, "skipping background processing");
                }
            }
            None => self.ingest_inline(guid).await?,
        }
        Ok(guid)
    }

    async fn ingest_inline(&self, guid: Id) -> Result<()> {
        let followup = self.pipeline.run_digest(guid).await?;
        if followup.graph
            && let Err(e) = self.pipeline.run_graph(guid).await
        {
            warn!(turn = %guid, error = %e, "graph processing failed");
        }
        if followup.compression
            && let Err(e) = self.pipeline.run_compression().await
        {
            warn!(error = %e, "compression failed");
        }
        Ok(())
    }

    /// Answer a query from assembled memory context.
    ///
    /// Reads only currently persisted state and never waits on background
    /// queues; stale retrieval data degrades the answer, not the latency.
    /// An LLM failure yields the error reply plus a system turn.
    pub async fn query_memory(&self, query: &str) -> Result<String> {
        let snapshot = { self.pipeline.memory.lock().clone() };

        let semantic = match self
            .pipeline
            .index
            .search_filtered(query, RETRIEVAL_K, |m| m.is_segment())
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "semantic retrieval failed, degrading to graph and recent turns");
                Vec::new()
            }
        };
        let graph_context = match &self.pipeline.graph {
            Some(graph) => Some(graph.query_for_context(query, RETRIEVAL_K).await),
            None => None,
        };

        let prompt = self.build_query_prompt(&snapshot, &semantic, graph_context.as_ref(), query);
        let request = GenerateRequest::new(prompt).with_temperature(REPLY_TEMPERATURE);

        match self.pipeline.backend.generate(request).await {
            Ok(response) => {
                self.add_turn(Role::User, query).await?;
                self.add_turn(Role::Agent, &response).await?;
                Ok(response)
            }
            Err(e) => {
                error!(error = %e, "query reply generation failed");
                self.add_turn(Role::User, query).await?;
                self.add_turn(Role::System, &format!("query failed: {e}")).await?;
                Ok(QUERY_ERROR_REPLY.to_string())
            }
        }
    }

    fn build_query_prompt(
        &self,
        snapshot: &SessionMemory,
        semantic: &[SearchHit],
        graph: Option<&GraphContext>,
        query: &str,
    ) -> String {
        let context = if snapshot.context.is_empty() {
            "(none)\n".to_string()
        } else {
            snapshot
                .context
                .iter()
                .map(|e| format!("- {}\n", e.text))
                .collect()
        };

        let semantic_matches = if semantic.is_empty() {
            "(none)\n".to_string()
        } else {
            semantic
                .iter()
                .map(|h| format!("- {}\n", h.record.text))
                .collect()
        };

        let graph_context = match graph {
            Some(ctx) if !ctx.hits.is_empty() => ctx
                .hits
                .iter()
                .map(|h| {
                    format!(
                        "- {} ({}): {}\n",
                        h.node.name, h.node.entity_type, h.node.description
                    )
                })
                .collect(),
            _ => "(none)\n".to_string(),
        };

        let recent_history: String = snapshot
            .recent_turns(self.pipeline.config.recent_window)
            .iter()
            .map(|t| format!("{}: {}\n", t.role.label(), t.content))
            .collect();

        self.query_template.fill(&[
            ("static_memory", &snapshot.static_memory),
            ("context", &context),
            ("semantic_matches", &semantic_matches),
            ("graph_context", &graph_context),
            ("recent_history", &recent_history),
            ("query", query),
        ])
    }

    /// Whether any background queue holds or is running a task.
    pub fn has_pending_operations(&self) -> bool {
        self.scheduler
            .as_ref()
            .is_some_and(|s| s.total_depth() > 0)
    }

    /// Wait until all background queues are drained, in-flight tasks
    /// included. Returns immediately in synchronous mode.
    pub async fn wait_for_pending_operations(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.wait_for_pending().await;
        }
    }

    /// Queue depths and last-completion timestamps, when running in
    /// background mode.
    pub fn scheduler_stats(&self) -> Option<SchedulerStats> {
        self.scheduler.as_ref().map(|s| s.stats())
    }

    /// A clone of the current in-memory session state.
    pub fn snapshot(&self) -> SessionMemory {
        self.pipeline.memory.lock().clone()
    }

    /// The graph manager, when the graph subsystem is enabled.
    pub fn graph(&self) -> Option<&GraphManager> {
        self.pipeline.graph.as_ref()
    }

    /// Stop background workers. In-flight tasks complete first.
    pub async fn shutdown(mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
