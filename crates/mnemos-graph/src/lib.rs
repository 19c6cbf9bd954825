//! Knowledge graph subsystem.
//!
//! The pipeline runs in three stages per turn: the extractor proposes
//! candidate entities from the turn text, the resolver decides per candidate
//! whether it names an existing node or something new (RAG against the
//! embeddings index plus one LLM judgement), and the relationship extractor
//! connects the resolved entities with typed edges. The [`GraphManager`]
//! composes the three and is the only writer to the graph store.

mod error;
mod extract;
mod manager;
mod model;
mod relations;
mod resolve;

pub use error::{GraphError, Result};
pub use extract::{EntityCandidate, EntityExtractor};
pub use manager::{GraphContext, GraphHit, GraphManager, ProcessOutcome, ProcessStats};
pub use model::{GraphEdge, GraphNode, node_id, slug};
pub use relations::{Relationship, RelationshipExtractor, ResolvedEntity};
pub use resolve::{EntityResolver, NEW_SENTINEL, Resolution, ResolutionMode};
