//! OpenAI-compatible chat client used by the chat-backed crew.
//!
//! # Overview
//!
//! [`ChatCompletionsClient`] streams a single completion from
//! `/v1/chat/completions` (or the Azure deployment equivalent) as
//! [`ChatDelta`]s. There is no tool loop; each crew agent is one prompt.
//!
//! # Example
//!
//! ```rust,ignore
//! use crew_agui::llm::{ChatCompletionsClient, ChatDelta, ChatMessage, LlmSettings, Provider};
//! use futures::StreamExt;
//!
//! let settings = LlmSettings {
//!     base_url: "https://api.openai.com".to_string(),
//!     api_key: Some("sk-...".to_string()),
//!     model: "gpt-4o-mini".to_string(),
//!     provider: Provider::OpenAI,
//!     temperature: None,
//! };
//! let client = ChatCompletionsClient::new(settings);
//! let mut stream = client.stream(&[ChatMessage::user("Find ramen in Tokyo")]).await?;
//! while let Some(delta) = stream.next().await {
//!     if let ChatDelta::Text(s) = delta? {
//!         print!("{s}");
//!     }
//! }
//! ```

pub mod chat_completions;
pub mod provider;

pub use chat_completions::{ChatCompletionsClient, ChatDelta};
pub use provider::Provider;

/// LLM connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Provider type, detected from `base_url`.
    pub provider: Provider,
    pub temperature: Option<f32>,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A text-only chat message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}
