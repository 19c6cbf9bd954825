//! The stage runner shared by the background workers and the synchronous
//! ingest path.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use mnemos_embeddings::{EmbeddingMetadata, EmbeddingsIndex};
use mnemos_graph::GraphManager;
use mnemos_llm::SharedBackend;
use mnemos_store::SessionStore;
use mnemos_types::{DomainConfig, Id, RatedSegment, SessionMemory, now};

use crate::compress::MemoryCompressor;
use crate::digest::DigestGenerator;
use crate::error::Result;

/// What the digest stage scheduled next.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DigestFollowup {
    /// Graph processing is warranted (graph enabled, retained segments).
    pub graph: bool,
    /// The recent-turn window overflowed.
    pub compression: bool,
}

/// Shared state and stage logic for one session.
///
/// The session memory lock is never held across an LLM, embedder, or other
/// suspension point; every mutation persists before the lock is released.
pub(crate) struct Pipeline {
    pub(crate) store: SessionStore,
    pub(crate) memory: Mutex<SessionMemory>,
    pub(crate) index: Arc<EmbeddingsIndex>,
    pub(crate) graph: Option<GraphManager>,
    pub(crate) backend: SharedBackend,
    pub(crate) config: DomainConfig,
    digester: DigestGenerator,
    compressor: MemoryCompressor,
}

impl Pipeline {
    pub(crate) fn new(
        store: SessionStore,
        memory: SessionMemory,
        index: Arc<EmbeddingsIndex>,
        graph: Option<GraphManager>,
        backend: SharedBackend,
        config: DomainConfig,
    ) -> Self {
        let root = store.root().to_path_buf();
        let digester = DigestGenerator::new(backend.clone())
            .with_template(DigestGenerator::load_template(&root));
        let compressor = MemoryCompressor::new(backend.clone(), &config)
            .with_template(MemoryCompressor::load_template(&root));
        Self {
            store,
            memory: Mutex::new(memory),
            index,
            graph,
            backend,
            config,
            digester,
            compressor,
        }
    }

    /// Digest stage: attach a digest to the turn, persist, embed the
    /// retained segments, and report what should run next.
    pub(crate) async fn run_digest(&self, turn_guid: Id) -> Result<DigestFollowup> {
        let turn = { self.memory.lock().turn(turn_guid).cloned() };
        let Some(turn) = turn else {
            warn!(turn = %turn_guid, "turn no longer in history, skipping digest");
            return Ok(DigestFollowup::default());
        };

        let digest = self.digester.generate(&turn).await;
        let retained: Vec<RatedSegment> = digest
            .retained_segments(self.config.importance_threshold)
            .into_iter()
            .cloned()
            .collect();

        {
            let mut memory = self.memory.lock();
            if let Some(t) = memory.turn_mut(turn_guid) {
                t.digest = Some(digest);
            }
            memory.metadata.last_updated = now();
            self.store.save_memory(&memory)?;
        }

        // Embed failures drop the segment, never the turn.
        for segment in &retained {
            let metadata = EmbeddingMetadata::Segment {
                turn_guid,
                importance: segment.importance,
                topics: segment.topics.clone(),
            };
            if let Err(e) = self.index.add(&segment.text, metadata).await {
                warn!(turn = %turn_guid, error = %e, "failed to embed segment, dropping");
            }
        }

        let compression = { self.compressor.is_due(&self.memory.lock()) };
        Ok(DigestFollowup {
            graph: self.graph.is_some() && !retained.is_empty(),
            compression,
        })
    }

    /// Graph stage: run extract-resolve-relate over the turn.
    pub(crate) async fn run_graph(&self, turn_guid: Id) -> Result<()> {
        let Some(graph) = &self.graph else {
            return Ok(());
        };
        let turn = { self.memory.lock().turn(turn_guid).cloned() };
        let Some(turn) = turn else {
            warn!(turn = %turn_guid, "turn no longer in history, skipping graph stage");
            return Ok(());
        };

        let digest_text = turn
            .digest
            .as_ref()
            .map(|d| {
                d.retained_segments(self.config.importance_threshold)
                    .iter()
                    .map(|s| s.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        graph.process_turn(&turn.content, &digest_text, turn_guid).await?;
        Ok(())
    }

    /// Compression stage: consolidate turns beyond the recent window.
    pub(crate) async fn run_compression(&self) -> Result<()> {
        let snapshot = { self.memory.lock().clone() };
        let Some(outcome) = self.compressor.compress(&snapshot).await else {
            return Ok(());
        };

        let mut memory = self.memory.lock();
        MemoryCompressor::apply(outcome, &mut memory);
        memory.metadata.last_updated = now();
        self.store.save_memory(&memory)?;
        Ok(())
    }
}
