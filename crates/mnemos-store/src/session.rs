//! Per-session store: memory snapshot and full-turn log.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use mnemos_types::{SessionMemory, Turn};

use crate::atomic::{save_json_atomic, save_json_atomic_no_backup};
use crate::error::Result;

const MEMORY_FILE: &str = "agent_memory.json";
const CONVERSATIONS_FILE: &str = "agent_memory_conversations.json";
const EMBEDDINGS_FILE: &str = "embeddings.jsonl";

/// Durable storage for one session's memory snapshot and turn log.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Open (or create) the session directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join("graph_data"))?;
        info!(root = %root.display(), "session store opened");
        Ok(Self { root })
    }

    /// Root directory of this session.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the append-only embeddings file.
    pub fn embeddings_path(&self) -> PathBuf {
        self.root.join(EMBEDDINGS_FILE)
    }

    /// Path of the graph data directory.
    pub fn graph_dir(&self) -> PathBuf {
        self.root.join("graph_data")
    }

    /// Load the memory snapshot, if one exists.
    pub fn load_memory(&self) -> Result<Option<SessionMemory>> {
        let path = self.root.join(MEMORY_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let memory = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), "loaded session memory");
        Ok(Some(memory))
    }

    /// Persist the memory snapshot, rotating the previous version to a backup.
    pub fn save_memory(&self, memory: &SessionMemory) -> Result<()> {
        let path = self.root.join(MEMORY_FILE);
        save_json_atomic(&path, memory)?;
        debug!(
            turns = memory.conversation_history.len(),
            context_entries = memory.context.len(),
            "saved session memory"
        );
        Ok(())
    }

    /// Load the full turn log.
    pub fn load_turn_log(&self) -> Result<Vec<Turn>> {
        let path = self.root.join(CONVERSATIONS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Append a turn to the full log. The log is never compressed.
    pub fn append_turn_log(&self, turn: &Turn) -> Result<()> {
        let mut log = self.load_turn_log()?;
        log.push(turn.clone());
        save_json_atomic_no_backup(&self.root.join(CONVERSATIONS_FILE), &log)
    }
}
