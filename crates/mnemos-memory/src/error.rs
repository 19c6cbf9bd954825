use thiserror::Error;

/// Errors from the memory pipeline.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("store error: {0}")]
    Store(#[from] mnemos_store::StoreError),

    #[error("embeddings error: {0}")]
    Embeddings(#[from] mnemos_embeddings::EmbeddingsError),

    #[error("graph error: {0}")]
    Graph(#[from] mnemos_graph::GraphError),

    #[error("background queue {queue} is full")]
    QueueFull { queue: &'static str },
}

pub type Result<T> = std::result::Result<T, MemoryError>;
