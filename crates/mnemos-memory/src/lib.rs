//! Session memory pipeline.
//!
//! [`MemoryManager`] is the foreground API: ingest turns, answer queries
//! from assembled context, and (optionally) delegate digesting, graph
//! processing, and compression to background workers so the query path
//! never blocks on them.

mod compress;
mod digest;
mod error;
mod manager;
mod pipeline;
mod scheduler;

pub use compress::{CompressionOutcome, MemoryCompressor};
pub use digest::DigestGenerator;
pub use error::{MemoryError, Result};
pub use manager::MemoryManager;
pub use scheduler::{QueueStats, SchedulerStats, Task};
