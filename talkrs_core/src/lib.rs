#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub mod tokens;

pub use tokens::{HeuristicCounter, TiktokenCounter, TokenCounter, default_counter};

/// Role of a message on the wire to the completion service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Who spoke a stored turn.
///
/// This is a plain tag. Display labels ("Human", "AI") live on the
/// conversation context and never take part in comparisons.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Human,
    Ai,
}

impl Speaker {
    /// Wire role used when the turn is replayed upstream.
    #[must_use]
    pub const fn wire_role(self) -> Role {
        match self {
            Self::Human => Role::User,
            Self::Ai => Role::Assistant,
        }
    }
}

/// One half of an exchange. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl Turn {
    #[must_use]
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Human,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Ai,
            text: text.into(),
        }
    }
}

/// A fully built request for the upstream completion service.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Caller identity for upstream attribution, `None` when the deployment
    /// forbids per-user attribution.
    pub user: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Incremental content fragments of a streaming completion.
///
/// The stream ending (`None`) is the normal end-of-stream signal.
pub type DeltaStream = BoxStream<'static, anyhow::Result<String>>;

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<LLMResponse>;
    async fn complete_stream(&self, request: &CompletionRequest) -> anyhow::Result<DeltaStream>;
    fn get_default_model(&self) -> &str;
    /// Whether requests may carry the caller identity.
    fn attributes_user(&self) -> bool {
        true
    }
}

/// Opaque key/value store for serialized conversation contexts.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()>;
    async fn clear(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink rejected update: {0}")]
    Rejected(String),

    #[error("sink transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

/// A slow downstream surface (an editable message, a card, a terminal)
/// that displays the visible text of an answer while it streams.
#[async_trait]
pub trait StreamSink: Send + Sync {
    /// Replace the displayed content. `is_final` marks the answer complete.
    async fn update(&self, content: &str, is_final: bool) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speakers_map_to_wire_roles() {
        assert_eq!(Speaker::Human.wire_role(), Role::User);
        assert_eq!(Speaker::Ai.wire_role(), Role::Assistant);
    }

    #[test]
    fn chat_message_serializes_lowercase_role() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap_or_default();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }
}
