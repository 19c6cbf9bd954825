//! LLM and embedder capabilities for Mnemos.
//!
//! The memory pipeline never talks to a provider directly; every component is
//! constructor-injected with a [`SharedBackend`] offering two blocking-style
//! async calls: `generate(prompt) -> text` and `embed(text) -> vector`. This
//! crate provides the trait, an Ollama-compatible HTTP implementation, a
//! scriptable [`MockBackend`] for tests, prompt-template loading, and the
//! tolerant JSON extraction used on every LLM reply.

pub mod backend;
pub mod error;
pub mod ollama;
pub mod parse;
pub mod template;

pub use backend::{GenerateRequest, LlmBackend, MockBackend, SharedBackend};
pub use error::{LlmError, Result};
pub use ollama::{OllamaBackend, OllamaConfig};
pub use parse::{extract_json_array, extract_json_object};
pub use template::PromptTemplate;
