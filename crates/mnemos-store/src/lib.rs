//! Atomic JSON persistence for Mnemos sessions.
//!
//! One session owns one directory:
//!
//! ```text
//! <root>/<session_guid>/
//!   agent_memory.json                 # session memory snapshot
//!   agent_memory_bak_<N>.json         # numbered backups
//!   agent_memory_conversations.json   # full turn log (never compressed)
//!   graph_data/graph_nodes.json
//!   graph_data/graph_edges.json
//!   graph_data/graph_metadata.json
//!   embeddings.jsonl                  # append-only, owned by the index
//!   prompts/*.prompt                  # template overrides
//! ```
//!
//! Every save is write-to-temp-then-rename and copies the previous version to
//! a numbered backup first, so crashes never leave a torn snapshot behind.

pub mod atomic;
pub mod error;
pub mod graph;
pub mod session;

pub use atomic::{next_backup_index, save_json_atomic};
pub use error::{Result, StoreError};
pub use graph::{GraphMetadata, GraphStore};
pub use session::SessionStore;
