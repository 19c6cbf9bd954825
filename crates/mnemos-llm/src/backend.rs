//! Backend trait and the mock implementation used throughout the tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{LlmError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// A text-generation request.
///
/// The core always sets `stream = false`; temperature is per-call (0 for
/// extraction prompts, 0.7 for reply generation).
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub temperature: f32,
    pub stream: bool,
}

impl GenerateRequest {
    /// Create a deterministic (temperature 0) request.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: 0.0,
            stream: false,
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// The two external capabilities the memory pipeline consumes.
///
/// Both calls are suspension points in the concurrency model: workers may be
/// rescheduled across them, and every caller applies its component's failure
/// policy when they return an error.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Produce text for a prompt. Never streams.
    async fn generate(&self, request: GenerateRequest) -> Result<String>;

    /// Produce an embedding vector for a text. The dimension is constant for
    /// the lifetime of a session.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Name of this backend for logging.
    fn name(&self) -> &str;
}

/// A backend that can be shared across tasks.
pub type SharedBackend = Arc<dyn LlmBackend>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Backend
// ─────────────────────────────────────────────────────────────────────────────

/// A mock backend for testing.
///
/// Generate replies are returned in order from a scripted queue and every
/// request is logged for inspection. Embeddings are deterministic bag-of-words
/// vectors so that texts sharing tokens land near each other in cosine space.
#[derive(Debug)]
pub struct MockBackend {
    name: String,
    replies: Mutex<Vec<String>>,
    request_log: Mutex<Vec<GenerateRequest>>,
    embed_dim: usize,
    fail_generate: bool,
    fail_embed: bool,
}

impl MockBackend {
    /// Create a mock with scripted replies, returned in order.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "mock".to_string(),
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            request_log: Mutex::new(Vec::new()),
            embed_dim: 32,
            fail_generate: false,
            fail_embed: false,
        }
    }

    /// Create a mock that always returns the same reply.
    ///
    /// Unlike [`MockBackend::new`], the reply queue never exhausts.
    pub fn with_text(text: impl Into<String>) -> Self {
        let text = text.into();
        // A large scripted queue of the same reply.
        Self::new(std::iter::repeat_n(text, 64))
    }

    /// Create a mock whose `generate` always fails.
    pub fn failing_generate() -> Self {
        let mut mock = Self::new(Vec::<String>::new());
        mock.fail_generate = true;
        mock
    }

    /// Create a mock whose `embed` always fails (generate still works).
    pub fn failing_embed<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut mock = Self::new(replies);
        mock.fail_embed = true;
        mock
    }

    /// Set the embedding dimension (default 32).
    pub fn with_embed_dim(mut self, dim: usize) -> Self {
        self.embed_dim = dim;
        self
    }

    /// All generate requests made so far.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.request_log.lock().clone()
    }

    /// Number of generate requests made so far.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().len()
    }

    /// Deterministic bag-of-words embedding, L2-normalized.
    pub fn embedding_for(text: &str, dim: usize) -> Vec<f32> {
        let mut vector = vec![0.0f32; dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hash: u64 = 1469598103934665603;
            for byte in token.to_lowercase().bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            vector[(hash % dim as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        self.request_log.lock().push(request);

        if self.fail_generate {
            return Err(LlmError::Backend("mock generate failure".to_string()));
        }

        let mut replies = self.replies.lock();
        if replies.is_empty() {
            return Err(LlmError::Backend(
                "MockBackend: no more replies available".to_string(),
            ));
        }
        Ok(replies.remove(0))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail_embed {
            return Err(LlmError::Backend("mock embed failure".to_string()));
        }
        Ok(Self::embedding_for(text, self.embed_dim))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replies_in_order() {
        let backend = MockBackend::new(["first", "second"]);

        let r1 = backend.generate(GenerateRequest::new("a")).await.unwrap();
        let r2 = backend.generate(GenerateRequest::new("b")).await.unwrap();

        assert_eq!(r1, "first");
        assert_eq!(r2, "second");
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_exhausted() {
        let backend = MockBackend::new(Vec::<String>::new());
        let result = backend.generate(GenerateRequest::new("a")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mock_request_log_captures_prompt() {
        let backend = MockBackend::with_text("ok");
        backend
            .generate(GenerateRequest::new("the prompt").with_temperature(0.7))
            .await
            .unwrap();

        let requests = backend.requests();
        assert_eq!(requests[0].prompt, "the prompt");
        assert!((requests[0].temperature - 0.7).abs() < f32::EPSILON);
        assert!(!requests[0].stream);
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let backend = MockBackend::with_text("ok");
        let a = backend.embed("Elena the mayor").await.unwrap();
        let b = backend.embed("Elena the mayor").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn test_similar_texts_are_closer_than_dissimilar() {
        let dim = 32;
        let a = MockBackend::embedding_for("Elena mayor of Haven", dim);
        let b = MockBackend::embedding_for("Elena the mayor speaks", dim);
        let c = MockBackend::embedding_for("ancient dragon cave treasure", dim);

        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(p, q)| p * q).sum::<f32>();
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[tokio::test]
    async fn test_failing_backends() {
        let backend = MockBackend::failing_generate();
        assert!(backend.generate(GenerateRequest::new("x")).await.is_err());
        // Embeddings still work on a generate-failing mock.
        assert!(backend.embed("x").await.is_ok());

        let backend = MockBackend::failing_embed(["reply"]);
        assert!(backend.embed("x").await.is_err());
        assert!(backend.generate(GenerateRequest::new("x")).await.is_ok());
    }

    #[test]
    fn test_zero_text_embedding_is_zero_vector() {
        let v = MockBackend::embedding_for("", 8);
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
