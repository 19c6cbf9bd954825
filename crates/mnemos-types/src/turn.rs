//! Conversation turns.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::{Id, Timestamp, new_id, now};

/// Role of a turn in the conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

impl Role {
    /// Uppercase label used when formatting transcripts for prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Agent => "AGENT",
            Role::System => "SYSTEM",
        }
    }
}

/// One role-tagged utterance in the conversation log.
///
/// A turn is created with a fresh GUID and timestamp; its digest is attached
/// later by the digest worker (or inline in the synchronous pipeline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub guid: Id,
    pub role: Role,
    pub content: String,
    pub timestamp: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
}

impl Turn {
    /// Create a new turn with a fresh GUID and the current timestamp.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            guid: new_id(),
            role,
            content: content.into(),
            timestamp: now(),
            digest: None,
        }
    }

    /// Create a new user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new agent turn.
    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Role::Agent, content)
    }

    /// Create a new system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// True once a digest has been attached, whether or not it parsed cleanly.
    pub fn has_digest(&self) -> bool {
        self.digest.is_some()
    }
}
