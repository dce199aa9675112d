//! AI client adapter: one logical request with timeout, retry and backoff.

use crate::batch::monitor::PerformanceMonitor;
use crate::batch::types::AiResponse;
use crate::config::AiRequestConfig;
use crate::prompts::SYSTEM_PROMPT;
use quill_abstraction::{ChatMessage, Model, ModelError, truncate_for_diagnostics};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Characters of an upstream diagnostic kept in an [`AiResponse`].
const DIAGNOSTIC_LIMIT: usize = 400;

/// Sends rendered prompts to a [`Model`], retrying transient failures.
///
/// Only throttling and upstream server errors are retried, following the job's
/// [`RetryPolicy`](crate::batch::RetryPolicy). Timeouts, authentication failures and
/// other client errors end the request after the attempt that produced them. Every
/// retry is counted on the shared [`PerformanceMonitor`] as it happens.
#[derive(Clone)]
pub struct AiClient {
    model: Arc<dyn Model>,
    request: Arc<AiRequestConfig>,
    monitor: Arc<PerformanceMonitor>,
    system_prompt: String,
}

impl std::fmt::Debug for AiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiClient")
            .field("model", &self.model.model_id())
            .field("base_url", &self.request.base_url)
            .field("timeout", &self.request.timeout)
            .field("max_retries", &self.request.retry.max_retries)
            .finish_non_exhaustive()
    }
}

impl AiClient {
    /// Create a client sharing `monitor` with the rest of the job.
    pub fn new(model: Arc<dyn Model>, request: Arc<AiRequestConfig>, monitor: Arc<PerformanceMonitor>) -> Self {
        Self { model, request, monitor, system_prompt: SYSTEM_PROMPT.to_string() }
    }

    /// Replace the system message sent ahead of every prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Request configuration in use.
    pub fn request(&self) -> &AiRequestConfig {
        &self.request
    }

    /// Monitor receiving retry counts.
    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Send one prompt and wait for its final outcome.
    ///
    /// Never fails: upstream problems are reported through [`AiResponse::success`]
    /// and [`AiResponse::error`].
    pub async fn send(&self, prompt: &str) -> AiResponse {
        let messages = [ChatMessage::system(self.system_prompt.clone()), ChatMessage::user(prompt)];
        let policy = &self.request.retry;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.attempt(&messages).await {
                Ok(response) => {
                    debug!(model = %self.request.model, attempt, "Upstream request succeeded");
                    if let Some(usage) = &response.usage {
                        self.monitor.record_usage(usage);
                    }
                    return AiResponse::ok(response.content, attempt);
                }
                Err(err) if err.is_retryable() && attempt <= policy.max_retries => {
                    let delay = policy.delay_for(attempt - 1);
                    warn!(
                        model = %self.request.model,
                        attempt,
                        status = ?err.status(),
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "Retrying upstream request after backoff"
                    );
                    self.monitor.record_retry();
                    sleep(delay).await;
                }
                Err(err) => {
                    warn!(model = %self.request.model, attempt, error = %err, "Upstream request failed");
                    return AiResponse::failed(truncate_for_diagnostics(&err.to_string(), DIAGNOSTIC_LIMIT), attempt);
                }
            }
        }
    }

    async fn attempt(&self, messages: &[ChatMessage]) -> Result<quill_abstraction::ModelResponse, ModelError> {
        let limit = self.request.timeout;
        match timeout(limit, self.model.generate_chat_completion(messages, Some(self.request.parameters()))).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::RetryPolicy;
    use async_trait::async_trait;
    use quill_abstraction::{ModelParameters, ModelResponse};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Replays a fixed script of outcomes and records when each call happened.
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<String, ModelError>>>,
        calls: Mutex<Vec<Instant>>,
        messages: Mutex<Vec<Vec<ChatMessage>>>,
        hang: bool,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<String, ModelError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                messages: Mutex::new(Vec::new()),
                hang: false,
            }
        }

        fn hanging() -> Self {
            Self { hang: true, ..Self::new(vec![]) }
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Model for ScriptedModel {
        async fn generate_chat_completion(
            &self,
            messages: &[ChatMessage],
            _parameters: Option<ModelParameters>,
        ) -> Result<ModelResponse, ModelError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.messages.lock().unwrap().push(messages.to_vec());
            if self.hang {
                sleep(Duration::from_secs(3600)).await;
            }
            let next = self.script.lock().unwrap().pop_front().unwrap_or_else(|| Ok("{}".to_string()));
            next.map(|content| ModelResponse { content, model_id: None, usage: None })
        }

        fn model_id(&self) -> &str {
            "scripted"
        }
    }

    fn request(retry: RetryPolicy) -> Arc<AiRequestConfig> {
        Arc::new(AiRequestConfig {
            api_key: "sk-test".to_string(),
            base_url: "http://localhost".to_string(),
            model: "scripted".to_string(),
            max_tokens: 100,
            temperature: 0.0,
            timeout: Duration::from_secs(5),
            retry,
        })
    }

    fn client(model: Arc<ScriptedModel>, retry: RetryPolicy) -> (AiClient, Arc<PerformanceMonitor>) {
        let monitor = Arc::new(PerformanceMonitor::new());
        (AiClient::new(model, request(retry), Arc::clone(&monitor)), monitor)
    }

    fn rate_limited() -> ModelError {
        ModelError::RateLimited("slow down".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_throttling_with_backoff() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(rate_limited()),
            Err(rate_limited()),
            Ok("{\"ok\":true}".to_string()),
        ]));
        let (client, monitor) = client(Arc::clone(&model), RetryPolicy::default());

        let response = client.send("hello").await;

        assert!(response.success);
        assert_eq!(response.raw_text, "{\"ok\":true}");
        assert_eq!(response.attempts, 3);
        assert_eq!(monitor.stats().retry_count, 2);

        let calls = model.call_times();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(1));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(ModelError::ServerError { status: 503, message: "busy".into() }),
            Err(ModelError::ServerError { status: 503, message: "busy".into() }),
            Err(ModelError::ServerError { status: 502, message: "bad gateway".into() }),
        ]));
        let retry = RetryPolicy::new(2, 2.0, 0.5, Duration::from_secs(60));
        let (client, monitor) = client(Arc::clone(&model), retry);

        let response = client.send("hello").await;

        assert!(!response.success);
        assert_eq!(response.attempts, 3);
        assert!(response.error.unwrap().contains("502"));
        assert_eq!(monitor.stats().retry_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_failure_is_not_retried() {
        let model = Arc::new(ScriptedModel::new(vec![Err(ModelError::AuthenticationFailed {
            status: 401,
            message: "invalid key".into(),
        })]));
        let (client, monitor) = client(Arc::clone(&model), RetryPolicy::default());

        let response = client.send("hello").await;

        assert!(!response.success);
        assert_eq!(response.attempts, 1);
        assert!(response.error.unwrap().contains("401"));
        assert_eq!(model.call_times().len(), 1);
        assert_eq!(monitor.stats().retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_not_retried() {
        let model = Arc::new(ScriptedModel::hanging());
        let (client, monitor) = client(Arc::clone(&model), RetryPolicy::default());

        let started = Instant::now();
        let response = client.send("hello").await;

        assert!(!response.success);
        assert_eq!(response.attempts, 1);
        assert!(response.error.unwrap().contains("timed out after 5000 ms"));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(monitor.stats().retry_count, 0);
    }

    #[tokio::test]
    async fn test_sends_system_and_user_messages() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("fine".to_string())]));
        let (client, _) = client(Arc::clone(&model), RetryPolicy::default());
        let client = client.with_system_prompt("Be brief.");

        client.send("Summarize this").await;

        let sent = model.messages.lock().unwrap()[0].clone();
        assert_eq!(sent, vec![ChatMessage::system("Be brief."), ChatMessage::user("Summarize this")]);
    }
}
