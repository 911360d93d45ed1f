// Embedding and generation capabilities
// The retrieval pipeline only sees these traits; `ollama` provides the HTTP client


pub mod ollama;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use ollama::OllamaClient;

/// Whether text is embedded for storage or as a search query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Document,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Trim `text` and cut it to at most `max_chars` characters
#[inline]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns
    fn embedding_size(&self) -> usize;

    /// `None` when the provider produced no vector for `text`
    async fn embed_text(&self, text: &str, document_type: DocumentType)
    -> Result<Option<Vec<f32>>>;

    /// One vector per input, in input order
    async fn embed_texts(
        &self,
        texts: &[String],
        document_type: DocumentType,
    ) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Build a chat message, applying the provider's input limits
    fn construct_message(&self, prompt: &str, role: ChatRole) -> ChatMessage;

    /// Send `chat_history` followed by `prompt` as a user turn.
    /// `None` when the model returned no content.
    async fn generate_text(
        &self,
        prompt: &str,
        chat_history: &[ChatMessage],
    ) -> Result<Option<String>>;
}
