//! Ollama-compatible HTTP backend.
//!
//! Speaks the `/api/generate` and `/api/embeddings` endpoints. Every call is
//! bounded by a wall-clock timeout that surfaces as [`LlmError::Timeout`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{GenerateRequest, LlmBackend};
use crate::error::{LlmError, Result};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for the Ollama backend.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL, e.g. `http://localhost:11434`.
    pub base_url: String,
    /// Model used for text generation.
    pub model: String,
    /// Model used for embeddings.
    pub embed_model: String,
    /// Wall-clock timeout per call.
    pub timeout: Duration,
}

impl OllamaConfig {
    /// Create a config for a local Ollama instance.
    pub fn new(model: impl Into<String>, embed_model: impl Into<String>) -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: model.into(),
            embed_model: embed_model.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
}

#[derive(Serialize)]
struct EmbeddingsBody<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsReply {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// HTTP backend against an Ollama-compatible server.
pub struct OllamaBackend {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a backend from configuration.
    pub fn new(config: OllamaConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(LlmError::Config("base_url must not be empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, client })
    }

    fn map_transport(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout {
                seconds: self.config.timeout.as_secs(),
            }
        } else {
            LlmError::Network(err)
        }
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.config.base_url);
        let body = GenerateBody {
            model: &self.config.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
            },
        };

        debug!(model = %self.config.model, prompt_len = request.prompt.len(), "ollama generate");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Backend(format!("HTTP {status}: {detail}")));
        }

        let reply: GenerateReply = response.json().await.map_err(|e| self.map_transport(e))?;
        if reply.response.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(reply.response)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.config.base_url);
        let body = EmbeddingsBody {
            model: &self.config.embed_model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Backend(format!("HTTP {status}: {detail}")));
        }

        let reply: EmbeddingsReply = response.json().await.map_err(|e| self.map_transport(e))?;
        if reply.embedding.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(reply.embedding)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = OllamaConfig::new("gemma3", "mxbai-embed-large")
            .with_base_url("http://10.0.0.2:11434")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.base_url, "http://10.0.0.2:11434");
        assert_eq!(config.model, "gemma3");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let config = OllamaConfig::new("m", "e").with_base_url("");
        assert!(OllamaBackend::new(config).is_err());
    }

    #[test]
    fn test_generate_body_serializes_stream_false() {
        let body = GenerateBody {
            model: "m",
            prompt: "p",
            stream: false,
            options: GenerateOptions { temperature: 0.0 },
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"stream\":false"));
    }
}
