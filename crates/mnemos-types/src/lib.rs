//! Shared data model for the Mnemos conversational memory engine.
//!
//! These types are the vocabulary of the whole pipeline: conversation turns,
//! per-turn digests, consolidated context entries, the session memory snapshot,
//! and the domain configuration record. Every other crate depends on this one
//! and nothing here touches disk or the network.

pub mod config;
pub mod digest;
pub mod memory;
pub mod turn;

pub use config::DomainConfig;
pub use digest::{Digest, RatedSegment, SegmentType};
pub use memory::{ContextEntry, MemoryMetadata, SessionMemory};
pub use turn::{Role, Turn};

/// Identifier type used throughout the system.
pub type Id = uuid::Uuid;

/// Timestamp type used throughout the system.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a new random identifier.
pub fn new_id() -> Id {
    uuid::Uuid::new_v4()
}

/// Current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}
