//! Model implementations for Quill.
//!
//! This crate provides concrete implementations of the `Model` trait.
//!
//! # Supported Providers
//!
//! - **Mock**: Offline dry runs and testing
//! - **OpenAI-compatible**: OpenAI, DeepSeek, vLLM or any server exposing
//!   `/chat/completions` (API key required)

pub mod openai;

use async_trait::async_trait;
use quill_abstraction::{ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage};
use tracing::debug;

pub use openai::{OpenAICompatibleModel, PoolSettings};

/// A deterministic offline implementation of the `Model` trait.
///
/// Replies with a small JSON object derived from the last user message, so runs over
/// the same input always produce the same output.
#[derive(Debug, Default)]
pub struct MockModel {
    id: String,
}

impl MockModel {
    /// Creates a new `MockModel` with the given ID.
    #[must_use]
    pub const fn new(id: String) -> Self {
        Self { id }
    }
}

#[async_trait]
impl Model for MockModel {
    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.id,
            message_count = messages.len(),
            parameters = ?parameters,
            "MockModel generating chat completion"
        );

        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let words = count_tokens(prompt);
        let preview: String = prompt.split_whitespace().take(8).collect::<Vec<_>>().join(" ");
        let content = serde_json::json!({ "summary": preview, "words": words }).to_string();

        let completion_tokens = count_tokens(&content);
        Ok(ModelResponse {
            content,
            model_id: Some(self.id.clone()),
            usage: Some(ModelUsage {
                prompt_tokens: words,
                completion_tokens,
                total_tokens: words + completion_tokens,
            }),
        })
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Count tokens in a string (simplified: word count).
fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_model_is_deterministic() {
        let model = MockModel::new("mock".to_string());
        let messages = vec![
            ChatMessage::system("You are a research assistant."),
            ChatMessage::user("Deep learning for protein folding"),
        ];

        let first = model.generate_chat_completion(&messages, None).await.unwrap();
        let second = model.generate_chat_completion(&messages, None).await.unwrap();
        assert_eq!(first.content, second.content);

        let value: serde_json::Value = serde_json::from_str(&first.content).unwrap();
        assert_eq!(value["words"], 5);
        assert_eq!(value["summary"], "Deep learning for protein folding");
        assert_eq!(first.model_id.as_deref(), Some("mock"));
    }

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("one two  three"), 3);
    }
}
