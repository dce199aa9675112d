//! Lenient interpretation of model replies.
//!
//! Replies are run through an ordered chain of [`ParseStrategy`]s; the first one that
//! succeeds wins:
//! 1. [`StrictJson`]: the whole reply is a JSON object or array.
//! 2. [`EnclosedJson`]: the span from the first `{` to the last `}` is a JSON object.
//! 3. [`KeywordScore`]: configured positive/negative keywords yield a bounded score.

use crate::config::ParsingSettings;
use quill_abstraction::truncate_for_diagnostics;
use serde_json::{Value, json};
use std::cmp::Ordering;
use thiserror::Error;

/// Characters of the original reply kept when interpretation fails.
const EXCERPT_LIMIT: usize = 200;

/// Interpretation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpretError {
    /// The reply was empty.
    #[error("empty model reply")]
    Empty,

    /// No strategy could make sense of the reply.
    #[error("unparseable model reply: {excerpt}")]
    Unparseable {
        /// The start of the reply, for diagnostics.
        excerpt: String,
    },
}

/// A successfully interpreted reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    /// Structured content.
    pub value: Value,
    /// Name of the strategy that produced it.
    pub strategy: &'static str,
}

/// One step of the fallback chain. Implementations are pure.
pub trait ParseStrategy: Send + Sync {
    /// Short name used in logs and in [`Interpretation::strategy`].
    fn name(&self) -> &'static str;

    /// Parse `text`, or return `None` to fall through to the next strategy.
    fn parse(&self, text: &str) -> Option<Value>;
}

/// Parses the full reply as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictJson;

impl ParseStrategy for StrictJson {
    fn name(&self) -> &'static str {
        "strict_json"
    }

    fn parse(&self, text: &str) -> Option<Value> {
        serde_json::from_str::<Value>(text.trim()).ok().filter(|v| v.is_object() || v.is_array())
    }
}

/// Parses the substring between the first `{` and the last `}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnclosedJson;

impl ParseStrategy for EnclosedJson {
    fn name(&self) -> &'static str {
        "enclosed_json"
    }

    fn parse(&self, text: &str) -> Option<Value> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str::<Value>(&text[start..=end]).ok().filter(Value::is_object)
    }
}

/// Scores a free-text reply by counting configured keywords.
///
/// More positive than negative hits gives `positive_score`, raised by `step` for every
/// extra net hit; the mirror image applies to negatives; a tie gives `neutral_score`.
/// The score is bounded to `[min_score, max_score]`. A reply without any keyword
/// falls through.
#[derive(Debug, Clone)]
pub struct KeywordScore {
    positive: Vec<String>,
    negative: Vec<String>,
    positive_score: f64,
    negative_score: f64,
    neutral_score: f64,
    step: f64,
    min_score: f64,
    max_score: f64,
}

impl KeywordScore {
    /// Build from parsing settings.
    pub fn from_settings(settings: &ParsingSettings) -> Self {
        let normalize = |words: &[String]| -> Vec<String> {
            words.iter().map(|w| w.trim().to_lowercase()).filter(|w| !w.is_empty()).collect()
        };
        Self {
            positive: normalize(&settings.positive_keywords),
            negative: normalize(&settings.negative_keywords),
            positive_score: settings.positive_score,
            negative_score: settings.negative_score,
            neutral_score: settings.neutral_score,
            step: settings.score_step,
            min_score: settings.min_score,
            max_score: settings.max_score,
        }
    }

    fn matches<'a>(words: &'a [String], haystack: &str) -> Vec<&'a str> {
        words.iter().filter(|w| contains_term(haystack, w)).map(String::as_str).collect()
    }
}

impl ParseStrategy for KeywordScore {
    fn name(&self) -> &'static str {
        "keyword_score"
    }

    fn parse(&self, text: &str) -> Option<Value> {
        let haystack = text.to_lowercase();
        let positive = Self::matches(&self.positive, &haystack);
        let negative = Self::matches(&self.negative, &haystack);
        if positive.is_empty() && negative.is_empty() {
            return None;
        }

        let net = positive.len() as f64 - negative.len() as f64;
        let (label, raw) = match net.partial_cmp(&0.0) {
            Some(Ordering::Greater) => ("positive", self.positive_score + self.step * (net - 1.0)),
            Some(Ordering::Less) => ("negative", self.negative_score - self.step * (-net - 1.0)),
            _ => ("neutral", self.neutral_score),
        };
        let score = raw.max(self.min_score).min(self.max_score);
        let score = (score * 1000.0).round() / 1000.0;

        let matched: Vec<&str> = positive.iter().chain(negative.iter()).copied().collect();
        Some(json!({ "score": score, "label": label, "matched": matched }))
    }
}

/// Whether `term` occurs in `haystack` on word boundaries. Both must be lowercase.
fn contains_term(haystack: &str, term: &str) -> bool {
    haystack.match_indices(term).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + term.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Runs a reply through the strategy chain.
pub struct ResponseInterpreter {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl std::fmt::Debug for ResponseInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("ResponseInterpreter").field("strategies", &names).finish()
    }
}

impl ResponseInterpreter {
    /// The standard chain for the given settings.
    pub fn new(settings: &ParsingSettings) -> Self {
        let mut strategies: Vec<Box<dyn ParseStrategy>> = vec![Box::new(StrictJson), Box::new(EnclosedJson)];
        if settings.keyword_fallback {
            strategies.push(Box::new(KeywordScore::from_settings(settings)));
        }
        Self { strategies }
    }

    /// A custom chain.
    pub fn with_strategies(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self { strategies }
    }

    /// Names of the strategies, in order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Interpret a reply.
    ///
    /// # Errors
    ///
    /// Returns `InterpretError::Unparseable` with a truncated excerpt when every
    /// strategy falls through.
    pub fn interpret(&self, text: &str) -> Result<Interpretation, InterpretError> {
        if text.trim().is_empty() {
            return Err(InterpretError::Empty);
        }

        self.strategies
            .iter()
            .find_map(|s| s.parse(text).map(|value| Interpretation { value, strategy: s.name() }))
            .ok_or_else(|| InterpretError::Unparseable {
                excerpt: truncate_for_diagnostics(text, EXCERPT_LIMIT),
            })
    }
}
