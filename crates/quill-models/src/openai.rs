//! OpenAI-compatible chat-completion model.
//!
//! Works against any server implementing `POST {base_url}/chat/completions` (OpenAI,
//! DeepSeek, vLLM, LM Studio, ...). Each call performs exactly one HTTP attempt; status
//! codes are mapped onto [`ModelError`] so the caller can decide whether to retry.

use async_trait::async_trait;
use quill_abstraction::{
    ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage,
    truncate_for_diagnostics,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Maximum number of characters of an upstream error body kept in a diagnostic.
const ERROR_BODY_LIMIT: usize = 400;

/// Connection-pool sizing for the shared HTTP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Idle keep-alive connections retained per host.
    pub keepalive: usize,
    /// How long an idle pooled connection is kept before being closed.
    pub idle_timeout: Duration,
    /// Timeout for establishing a new connection.
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            keepalive: 20,
            idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// OpenAI-compatible model implementation.
#[derive(Debug, Clone)]
pub struct OpenAICompatibleModel {
    /// The model ID (e.g., "gpt-4o-mini", "deepseek-chat").
    model_id: String,
    /// The API key for bearer authentication.
    api_key: String,
    /// The base URL for the API, without the `/chat/completions` suffix.
    base_url: String,
    /// Per-request timeout, reported in timeout errors.
    timeout: Duration,
    /// HTTP client shared by every request issued through this model.
    client: Client,
}

impl OpenAICompatibleModel {
    /// Creates a new model with the default pool settings and a 60s timeout.
    ///
    /// # Errors
    /// Returns a `ModelError` if the HTTP client cannot be built.
    pub fn new(model_id: String, base_url: String, api_key: String) -> Result<Self, ModelError> {
        Self::with_settings(model_id, base_url, api_key, Duration::from_secs(60), PoolSettings::default())
    }

    /// Creates a new model with an explicit timeout and pool sizing.
    ///
    /// # Errors
    /// Returns a `ModelError` if the HTTP client cannot be built.
    pub fn with_settings(
        model_id: String,
        base_url: String,
        api_key: String,
        timeout: Duration,
        pool: PoolSettings,
    ) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(pool.connect_timeout)
            .pool_max_idle_per_host(pool.keepalive)
            .pool_idle_timeout(pool.idle_timeout)
            .build()
            .map_err(|e| ModelError::RequestError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            model_id,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    /// The completion endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn map_send_error(&self, e: &reqwest::Error) -> ModelError {
        if e.is_timeout() {
            ModelError::Timeout(self.timeout.as_millis() as u64)
        } else {
            ModelError::RequestError(format!("Network error: {}", e))
        }
    }
}

/// Maps a non-success HTTP status and its body onto a [`ModelError`].
pub(crate) fn classify_status(status: StatusCode, body: &str) -> ModelError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => ModelError::AuthenticationFailed { status: status.as_u16(), message },
        429 => ModelError::RateLimited(message),
        s if status.is_server_error() => ModelError::ServerError { status: s, message },
        s => ModelError::ModelResponseError(format!("HTTP {}: {}", s, message)),
    }
}

/// Pulls a readable message out of an upstream error body.
///
/// Tries `{"error": {"message": ...}}`, then `{"message": ...}`, then falls back to the
/// raw body (truncated).
fn extract_error_message(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = v.pointer("/error/message").and_then(|m| m.as_str()) {
            return truncate_for_diagnostics(msg, ERROR_BODY_LIMIT);
        }
        if let Some(msg) = v.get("message").and_then(|m| m.as_str()) {
            return truncate_for_diagnostics(msg, ERROR_BODY_LIMIT);
        }
    }
    truncate_for_diagnostics(body, ERROR_BODY_LIMIT)
}

#[async_trait]
impl Model for OpenAICompatibleModel {
    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.model_id,
            message_count = messages.len(),
            parameters = ?parameters,
            "Sending chat completion request"
        );

        let params = parameters.unwrap_or_default();
        let request_body = CompletionRequest {
            model: &self.model_id,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send request to completion API");
                self.map_send_error(&e)
            })?;

        let status = response.status();
        // Read as text first so error bodies survive even when they are not JSON.
        let text = response.text().await.map_err(|e| self.map_send_error(&e))?;

        if !status.is_success() {
            let err = classify_status(status, &text);
            error!(status = %status, error = %err, "Completion API returned error status");
            return Err(err);
        }

        let completion: CompletionResponse = serde_json::from_str(&text).map_err(|e| {
            error!(error = %e, "Failed to parse completion API response");
            ModelError::SerializationError(format!(
                "Failed to parse response: {} (body: {})",
                e,
                truncate_for_diagnostics(&text, ERROR_BODY_LIMIT)
            ))
        })?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                ModelError::ModelResponseError(
                    "Invalid AI response: missing choices[0].message.content".to_string(),
                )
            })?;

        let usage = completion.usage.map(|u| ModelUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ModelResponse { content, model_id: Some(self.model_id.clone()), usage })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// Wire structures for the chat-completions endpoint.

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)] // Matches API naming
struct CompletionUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
