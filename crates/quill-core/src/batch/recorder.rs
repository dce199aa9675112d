//! Classification of row outcomes into terminal statuses.

use crate::batch::interpreter::ResponseInterpreter;
use crate::batch::types::{AiResponse, RowStatus, RowTask};
use crate::config::ParsingSettings;
use quill_abstraction::truncate_for_diagnostics;
use serde_json::Value;
use tracing::debug;

/// Characters kept in a result-cell diagnostic.
const CELL_DIAGNOSTIC_LIMIT: usize = 200;

/// What happened to a row before classification.
#[derive(Debug, Clone)]
pub enum RowOutcome {
    /// The primary field was blank; nothing was sent.
    Skipped,
    /// The AI client adapter returned.
    Response(AiResponse),
    /// Processing broke before the adapter could answer.
    Errored(String),
}

/// Terminal state derived from a [`RowOutcome`].
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Terminal status.
    pub status: RowStatus,
    /// Result-cell text.
    pub result: String,
    /// Structured interpretation, for successful rows.
    pub parsed: Option<Value>,
    /// Error detail for failed and errored rows.
    pub error: Option<String>,
}

impl Classification {
    fn failed(detail: String) -> Self {
        Self {
            status: RowStatus::Failed,
            result: format!("FAILED: {}", truncate_for_diagnostics(&detail, CELL_DIAGNOSTIC_LIMIT)),
            parsed: None,
            error: Some(detail),
        }
    }
}

/// Turns row outcomes into terminal statuses and result-cell text.
///
/// Rules, in order: a skipped row stays `Skipped`; an error raised around the adapter
/// is `Errored`; an unsuccessful response is `Failed`; anything else is `Success`.
/// With `require_structured`, a reply that no parse strategy understands is `Failed`
/// too, and the result cell holds the compact JSON of the interpretation.
#[derive(Debug)]
pub struct OutcomeRecorder {
    interpreter: ResponseInterpreter,
    require_structured: bool,
}

impl OutcomeRecorder {
    /// Recorder using the standard interpreter chain for `parsing`.
    pub fn new(parsing: &ParsingSettings) -> Self {
        Self { interpreter: ResponseInterpreter::new(parsing), require_structured: parsing.require_structured }
    }

    /// Recorder with a custom interpreter.
    pub fn with_interpreter(interpreter: ResponseInterpreter, require_structured: bool) -> Self {
        Self { interpreter, require_structured }
    }

    /// Classify an outcome without touching any task.
    pub fn classify(&self, outcome: &RowOutcome) -> Classification {
        match outcome {
            RowOutcome::Skipped => Classification {
                status: RowStatus::Skipped,
                result: "SKIPPED: empty input".to_string(),
                parsed: None,
                error: None,
            },
            RowOutcome::Errored(detail) => Classification {
                status: RowStatus::Errored,
                result: format!("ERROR: {}", truncate_for_diagnostics(detail, CELL_DIAGNOSTIC_LIMIT)),
                parsed: None,
                error: Some(detail.clone()),
            },
            RowOutcome::Response(response) if !response.success => Classification::failed(
                response.error.clone().unwrap_or_else(|| "upstream request failed".to_string()),
            ),
            RowOutcome::Response(response) => self.classify_reply(&response.raw_text),
        }
    }

    fn classify_reply(&self, raw_text: &str) -> Classification {
        let interpretation = self.interpreter.interpret(raw_text);
        match (interpretation, self.require_structured) {
            (Ok(found), true) => {
                debug!(strategy = found.strategy, "Reply interpreted");
                Classification {
                    status: RowStatus::Success,
                    result: found.value.to_string(),
                    parsed: Some(found.value),
                    error: None,
                }
            }
            (Err(err), true) => Classification::failed(err.to_string()),
            (_, false) if raw_text.trim().is_empty() => Classification::failed("empty model reply".to_string()),
            (found, false) => Classification {
                status: RowStatus::Success,
                result: raw_text.trim().to_string(),
                parsed: found.ok().map(|i| i.value),
                error: None,
            },
        }
    }

    /// Settle `task` with the classification of `outcome`.
    ///
    /// Returns the status the task ends in. A task that already settled keeps its
    /// status.
    pub fn record(&self, task: &mut RowTask, outcome: RowOutcome) -> RowStatus {
        if let RowOutcome::Response(response) = &outcome {
            task.attempts = response.attempts;
        }
        let classification = self.classify(&outcome);
        if task.settle(classification.status, Some(classification.result), classification.error) {
            task.parsed = classification.parsed;
        }
        task.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::types::CellRef;
    use serde_json::json;

    fn task() -> RowTask {
        RowTask::new(4, vec![], "Some abstract".into(), "A title".into(), CellRef { row: 4, column: 2 })
    }

    fn lenient() -> OutcomeRecorder {
        OutcomeRecorder::new(&ParsingSettings::default())
    }

    fn strict() -> OutcomeRecorder {
        OutcomeRecorder::new(&ParsingSettings { require_structured: true, ..ParsingSettings::default() })
    }

    #[test]
    fn test_skipped() {
        let mut t = task();
        assert_eq!(lenient().record(&mut t, RowOutcome::Skipped), RowStatus::Skipped);
        assert_eq!(t.attempts, 0);
        assert!(t.result.unwrap().starts_with("SKIPPED"));
        assert!(t.error.is_none());
    }

    #[test]
    fn test_errored() {
        let mut t = task();
        let status = lenient().record(&mut t, RowOutcome::Errored("task panicked".into()));
        assert_eq!(status, RowStatus::Errored);
        assert_eq!(t.result.as_deref(), Some("ERROR: task panicked"));
        assert_eq!(t.error.as_deref(), Some("task panicked"));
    }

    #[test]
    fn test_failed_response() {
        let mut t = task();
        let response = AiResponse::failed("Authentication failed (HTTP 401): bad key".into(), 1);
        assert_eq!(lenient().record(&mut t, RowOutcome::Response(response)), RowStatus::Failed);
        assert_eq!(t.attempts, 1);
        assert!(t.result.unwrap().starts_with("FAILED: Authentication failed (HTTP 401)"));
    }

    #[test]
    fn test_lenient_success_keeps_text_and_parses() {
        let mut t = task();
        let response = AiResponse::ok("  Sure: {\"relevance\": 0.7}  ".into(), 2);
        assert_eq!(lenient().record(&mut t, RowOutcome::Response(response)), RowStatus::Success);
        assert_eq!(t.result.as_deref(), Some("Sure: {\"relevance\": 0.7}"));
        assert_eq!(t.parsed, Some(json!({"relevance": 0.7})));
        assert_eq!(t.attempts, 2);
    }

    #[test]
    fn test_lenient_success_without_structure() {
        let mut t = task();
        let response = AiResponse::ok("A plain sentence.".into(), 1);
        assert_eq!(lenient().record(&mut t, RowOutcome::Response(response)), RowStatus::Success);
        assert!(t.parsed.is_none());
    }

    #[test]
    fn test_blank_reply_fails() {
        let mut t = task();
        let response = AiResponse::ok("   ".into(), 1);
        assert_eq!(lenient().record(&mut t, RowOutcome::Response(response)), RowStatus::Failed);
    }

    #[test]
    fn test_structured_success_stores_compact_json() {
        let mut t = task();
        let response = AiResponse::ok("noise {\"x\": 1} trailing".into(), 1);
        assert_eq!(strict().record(&mut t, RowOutcome::Response(response)), RowStatus::Success);
        assert_eq!(t.result.as_deref(), Some("{\"x\":1}"));
    }

    #[test]
    fn test_structured_unparseable_fails() {
        let mut t = task();
        let response = AiResponse::ok("cannot say".into(), 1);
        assert_eq!(strict().record(&mut t, RowOutcome::Response(response)), RowStatus::Failed);
        assert!(t.error.unwrap().contains("cannot say"));
    }

    #[test]
    fn test_record_is_single_shot() {
        let mut t = task();
        let recorder = lenient();
        recorder.record(&mut t, RowOutcome::Skipped);
        let status = recorder.record(&mut t, RowOutcome::Errored("late".into()));
        assert_eq!(status, RowStatus::Skipped);
        assert!(t.error.is_none());
    }
}
