//! Consolidation of old turns into durable context entries.
//!
//! Compression is snapshot-based: the caller hands in a clone of the session
//! memory, the compressor plans and runs the LLM call without any lock held,
//! and the resulting [`CompressionOutcome`] is applied back under the session
//! lock. Turns appended while the LLM was thinking are unaffected because
//! trimming is by GUID.

use serde_json::Value;
use tracing::{debug, warn};

use mnemos_llm::{
    GenerateRequest, PromptTemplate, Result as LlmResult, SharedBackend, extract_json_array,
};
use mnemos_types::{ContextEntry, DomainConfig, Id, SessionMemory};

const DEFAULT_TEMPLATE: &str = include_str!("../prompts/memory_compression.prompt");

/// The result of one compression pass.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    /// Consolidated entries to apply (replace-or-append).
    pub entries: Vec<ContextEntry>,
    /// GUIDs of turns to drop from `conversation_history`. The full turn
    /// log on disk keeps them forever.
    pub trimmed: Vec<Id>,
}

/// Consolidates the oldest turns beyond the recent window into context
/// entries.
pub struct MemoryCompressor {
    backend: SharedBackend,
    template: PromptTemplate,
    recent_window: usize,
    importance_threshold: u8,
}

impl MemoryCompressor {
    pub fn new(backend: SharedBackend, config: &DomainConfig) -> Self {
        Self {
            backend,
            template: PromptTemplate::from_text(DEFAULT_TEMPLATE),
            recent_window: config.recent_window,
            importance_threshold: config.importance_threshold,
        }
    }

    /// Replace the built-in prompt template.
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// Load `prompts/memory_compression.prompt` under `root`, falling back
    /// to the built-in template.
    pub fn load_template(root: &std::path::Path) -> PromptTemplate {
        PromptTemplate::load_or_default(root, "memory_compression", DEFAULT_TEMPLATE)
    }

    /// True when `memory` holds more turns than the recent window.
    pub fn is_due(&self, memory: &SessionMemory) -> bool {
        memory.conversation_history.len() > self.recent_window
    }

    /// Compress the oldest excess turns of `snapshot`.
    ///
    /// Returns `None` when nothing is due or when the LLM reply is unusable;
    /// in the failure case the context stays untouched and the next overflow
    /// reattempts.
    pub async fn compress(&self, snapshot: &SessionMemory) -> Option<CompressionOutcome> {
        let excess = snapshot
            .conversation_history
            .len()
            .saturating_sub(self.recent_window);
        if excess == 0 {
            return None;
        }
        let old_turns = &snapshot.conversation_history[..excess];
        let trimmed: Vec<Id> = old_turns.iter().map(|t| t.guid).collect();

        // Candidate segments: memory-worthy and important enough.
        let mut segments = String::new();
        let mut candidates = 0usize;
        for turn in old_turns {
            let Some(digest) = &turn.digest else { continue };
            for segment in digest.retained_segments(self.importance_threshold) {
                segments.push_str(&format!(
                    "- ({}) [importance {}] {}\n",
                    turn.guid, segment.importance, segment.text
                ));
                candidates += 1;
            }
        }

        if candidates == 0 {
            debug!(turns = excess, "no memory-worthy segments, trimming without consolidation");
            return Some(CompressionOutcome {
                entries: Vec::new(),
                trimmed,
            });
        }

        let context = if snapshot.context.is_empty() {
            "(none)\n".to_string()
        } else {
            snapshot
                .context
                .iter()
                .map(|e| format!("- [importance {}] {}\n", e.importance, e.text))
                .collect()
        };

        let prompt = self.template.fill(&[
            ("static_memory", &snapshot.static_memory),
            ("context", &context),
            ("segments", &segments),
        ]);

        let reply = match self.backend.generate(GenerateRequest::new(prompt)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "compression LLM call failed, leaving context untouched");
                return None;
            }
        };
        match parse_entries(&reply) {
            Ok(entries) => Some(CompressionOutcome { entries, trimmed }),
            Err(e) => {
                warn!(error = %e, raw = %reply, "unparseable compression reply, leaving context untouched");
                None
            }
        }
    }

    /// Apply an outcome to the live memory: merge entries, drop old turns.
    pub fn apply(outcome: CompressionOutcome, memory: &mut SessionMemory) {
        for entry in outcome.entries {
            memory.apply_context_entry(entry);
        }
        memory
            .conversation_history
            .retain(|t| !outcome.trimmed.contains(&t.guid));
    }
}

fn parse_entries(reply: &str) -> LlmResult<Vec<ContextEntry>> {
    let value = extract_json_array(reply)?;
    let mut entries = Vec::new();
    for item in value.as_array().into_iter().flatten() {
        let text = item["text"].as_str().unwrap_or("").trim().to_string();
        if text.is_empty() {
            continue;
        }
        let guids = item["guids"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .filter_map(|s| s.parse().ok())
                    .collect()
            })
            .unwrap_or_default();
        let importance = item["importance"]
            .as_f64()
            .unwrap_or(3.0)
            .round()
            .clamp(1.0, 5.0) as u8;
        entries.push(ContextEntry::new(text, guids, importance));
    }
    Ok(entries)
}
