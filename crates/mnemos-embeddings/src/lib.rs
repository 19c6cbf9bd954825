//! Append-only vector store backed by a JSONL file.
//!
//! Every embedded item is one line of JSON holding the source text, its
//! vector, and source-specific metadata. The file is the source of truth;
//! the in-memory copy is rebuilt from it on open. Search is a brute-force
//! cosine scan, which is plenty for per-session indexes of a few thousand
//! records.

mod error;
mod index;
mod record;

pub use error::{EmbeddingsError, Result};
pub use index::{EmbeddingsIndex, SearchHit, cosine_similarity};
pub use record::{EmbeddingMetadata, EmbeddingRecord};
