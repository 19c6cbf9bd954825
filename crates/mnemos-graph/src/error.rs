use thiserror::Error;

/// Errors from the graph subsystem.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("store error: {0}")]
    Store(#[from] mnemos_store::StoreError),

    #[error("embeddings error: {0}")]
    Embeddings(#[from] mnemos_embeddings::EmbeddingsError),
}

pub type Result<T> = std::result::Result<T, GraphError>;
