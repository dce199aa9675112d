//! Model abstraction layer for Quill.
//!
//! This crate defines the core trait and types used to talk to a chat-completion
//! upstream, plus the error taxonomy the enrichment engine uses to decide whether a
//! failed attempt is worth retrying.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error that can occur when interacting with an AI model.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// The request could not be sent (e.g., connection refused, DNS failure).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The request did not complete within the configured timeout.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The upstream rejected our credentials (HTTP 401/403).
    #[error("Authentication failed (HTTP {status}): {message}")]
    AuthenticationFailed {
        /// HTTP status code returned by the upstream.
        status: u16,
        /// Diagnostic body returned by the upstream (truncated).
        message: String,
    },

    /// The upstream throttled the request (HTTP 429).
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    /// The upstream failed on its side (HTTP 5xx).
    #[error("Upstream server error (HTTP {status}): {message}")]
    ServerError {
        /// HTTP status code returned by the upstream.
        status: u16,
        /// Diagnostic body returned by the upstream (truncated).
        message: String,
    },

    /// The model returned an unusable response (other non-2xx, missing content).
    #[error("Model Response Error: {0}")]
    ModelResponseError(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

impl ModelError {
    /// Whether a retry of the same request may succeed.
    ///
    /// Only throttling (429) and upstream server errors (5xx) are transient. Timeouts
    /// consume their attempt and are not retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::ServerError { .. })
    }

    /// HTTP status associated with this error, if the upstream answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthenticationFailed { status, .. } | Self::ServerError { status, .. } => {
                Some(*status)
            }
            Self::RateLimited(_) => Some(429),
            _ => None,
        }
    }
}

/// Represents a message in a conversation with a chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    pub role: String,
    /// The content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// Parameters for controlling the model's generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// What sampling temperature to use, between 0 and 2.
    pub temperature: Option<f32>,

    /// The maximum number of tokens to generate in the chat completion.
    pub max_tokens: Option<u32>,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self { temperature: Some(0.3), max_tokens: Some(1000) }
    }
}

/// The response from a chat completion model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated content (`choices[0].message.content`).
    pub content: String,

    /// Optional: The ID of the model used to generate the response.
    pub model_id: Option<String>,

    /// Optional: Usage statistics for the request.
    pub usage: Option<ModelUsage>,
}

/// Usage statistics for a model request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,

    /// Number of tokens in the completion.
    pub completion_tokens: u32,

    /// Total number of tokens used.
    pub total_tokens: u32,
}

/// A trait for interacting with chat-completion models.
///
/// Implementations perform exactly one upstream attempt per call; retry and backoff
/// are the caller's concern. All models must be `Send + Sync` so a single instance can
/// be shared by every row task of a batch.
#[async_trait]
pub trait Model: Send + Sync {
    /// Generates a chat completion based on the given conversation.
    ///
    /// # Errors
    /// Returns a `ModelError` if the attempt fails.
    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError>;

    /// Returns the ID of the model.
    fn model_id(&self) -> &str;
}

/// Truncates `text` to at most `max_chars` characters, appending `...` when cut.
///
/// Used for diagnostics so upstream bodies and model replies never flood a result cell.
pub fn truncate_for_diagnostics(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &trimmed[..byte_idx]),
        None => trimmed.to_string(),
    }
}
