use thiserror::Error;

/// Errors from the embeddings index.
#[derive(Debug, Error)]
pub enum EmbeddingsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding backend error: {0}")]
    Embed(#[from] mnemos_llm::LlmError),
}

pub type Result<T> = std::result::Result<T, EmbeddingsError>;
