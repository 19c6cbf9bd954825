//! Session memory: the durable per-session snapshot.

use serde::{Deserialize, Serialize};

use crate::turn::Turn;
use crate::{Id, Timestamp, now};

/// Schema version written into every snapshot.
pub const MEMORY_VERSION: &str = "1.0";

/// A consolidated, LLM-authored summary statement tied to a set of turn GUIDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub text: String,
    /// GUIDs of the turns this entry consolidates.
    #[serde(default)]
    pub guids: Vec<Id>,
    pub importance: u8,
    pub created_at: Timestamp,
}

impl ContextEntry {
    /// Create a new context entry stamped with the current time.
    pub fn new(text: impl Into<String>, guids: Vec<Id>, importance: u8) -> Self {
        Self {
            text: text.into(),
            guids,
            importance,
            created_at: now(),
        }
    }

    /// True when this entry's source GUIDs cover all of `other`'s.
    pub fn supersedes(&self, other: &ContextEntry) -> bool {
        !other.guids.is_empty() && other.guids.iter().all(|g| self.guids.contains(g))
    }
}

/// Snapshot metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub created_at: Timestamp,
    pub last_updated: Timestamp,
    pub version: String,
    pub session_guid: Id,
}

/// The durable memory for one session.
///
/// Invariants:
/// - `static_memory` bytes never change after initialization.
/// - Every turn in `conversation_history` has a unique GUID.
/// - `guids` inside a context entry reference historical turn GUIDs only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMemory {
    /// Immutable free-text seed for the domain.
    pub static_memory: String,
    /// Ordered list of consolidated context entries.
    pub context: Vec<ContextEntry>,
    /// Ordered list of turns, oldest first.
    pub conversation_history: Vec<Turn>,
    pub metadata: MemoryMetadata,
}

impl SessionMemory {
    /// Initialize a fresh session memory around a static seed.
    pub fn new(session_guid: Id, static_memory: impl Into<String>) -> Self {
        let created = now();
        Self {
            static_memory: static_memory.into(),
            context: Vec::new(),
            conversation_history: Vec::new(),
            metadata: MemoryMetadata {
                created_at: created,
                last_updated: created,
                version: MEMORY_VERSION.to_string(),
                session_guid,
            },
        }
    }

    /// Append a turn and touch `last_updated`.
    pub fn push_turn(&mut self, turn: Turn) {
        self.metadata.last_updated = now();
        self.conversation_history.push(turn);
    }

    /// Find a turn by GUID.
    pub fn turn(&self, guid: Id) -> Option<&Turn> {
        self.conversation_history.iter().find(|t| t.guid == guid)
    }

    /// Find a turn by GUID, mutably.
    pub fn turn_mut(&mut self, guid: Id) -> Option<&mut Turn> {
        self.conversation_history
            .iter_mut()
            .find(|t| t.guid == guid)
    }

    /// The last `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let len = self.conversation_history.len();
        &self.conversation_history[len.saturating_sub(n)..]
    }

    /// Apply a consolidated entry: replaces the first existing entry whose
    /// GUID set it supersedes, otherwise appends.
    pub fn apply_context_entry(&mut self, entry: ContextEntry) {
        self.metadata.last_updated = now();
        if let Some(existing) = self.context.iter_mut().find(|e| entry.supersedes(e)) {
            *existing = entry;
        } else {
            self.context.push(entry);
        }
    }
}
