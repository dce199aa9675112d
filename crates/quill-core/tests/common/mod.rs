//! Shared test utilities for Quill Core integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use quill_abstraction::{ChatMessage, Model, ModelError, ModelParameters, ModelResponse};
use quill_core::config::{ConfigResolver, MapEnv, Overrides, QuillSettings, ResolvedConfig};
use quill_core::InputTable;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Settings pointing at `base_url` with fast backoff.
pub fn settings_for(base_url: &str) -> QuillSettings {
    let mut settings = QuillSettings::default();
    settings.api.base_url = base_url.to_string();
    settings.api.model = "test-model".to_string();
    settings.api.timeout_secs = 5.0;
    settings.retry.backoff_multiplier = 0.01;
    settings
}

/// Resolve `settings` with a test API key and no other environment.
///
/// # Panics
/// Panics if the settings do not resolve.
pub fn resolve(settings: QuillSettings) -> ResolvedConfig {
    ConfigResolver::with_env(settings, MapEnv::from_pairs([("QUILL_API_KEY", "sk-test-key")]))
        .resolve(&Overrides::default())
        .unwrap()
}

/// A table of `rows` papers with unique `ROW-n` markers (1-based) in their abstracts.
///
/// Rows listed in `blank` get a whitespace-only abstract.
pub fn papers(rows: usize, blank: &[usize]) -> InputTable {
    let data = (1..=rows)
        .map(|n| {
            let abstract_text =
                if blank.contains(&n) { "   ".to_string() } else { format!("Abstract ROW-{n} about enzymes.") };
            vec![format!("Paper {n}"), abstract_text, format!("{}", 2000 + n)]
        })
        .collect();
    InputTable::new(vec!["Title".into(), "Abstract".into(), "Year".into()], data)
}

/// Chat-completion response body with `content`.
pub fn completion_body(content: &str) -> String {
    serde_json::json!({
        "id": "chatcmpl-test",
        "model": "test-model",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 6, "total_tokens": 18}
    })
    .to_string()
}

/// A slow fake upstream that records how many calls overlap.
#[derive(Debug, Default)]
pub struct InstrumentedModel {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    delay: Duration,
}

impl InstrumentedModel {
    pub fn new(delay: Duration) -> Self {
        Self { delay, ..Self::default() }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Model for InstrumentedModel {
    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        _parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let words = messages.last().map_or(0, |m| m.content.split_whitespace().count());
        Ok(ModelResponse { content: format!("{{\"words\": {words}}}"), model_id: None, usage: None })
    }

    fn model_id(&self) -> &str {
        "instrumented"
    }
}
