//! Configuration for the enrichment engine.
//!
//! Settings come from four layers, highest precedence first:
//! 1. Per-call overrides (e.g. a caller-supplied concurrency)
//! 2. Environment variables (`QUILL_*`, read once through an [`EnvSource`])
//! 3. Config files (`./.quillrc` over `~/.quill/config.toml`, or an explicit path)
//! 4. Defaults
//!
//! Resolution produces an immutable [`ResolvedConfig`] that is threaded explicitly
//! through every component of a batch.

mod env;
mod sizing;

pub use env::{EnvSource, MapEnv, ProcessEnv};
pub use sizing::recommend_batch_size;

use crate::batch::RetryPolicy;
use crate::prompts::RenderOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Absolute upper bound on concurrent upstream requests, whatever the caller asks for.
pub const HARD_CONCURRENCY_CEILING: usize = 50;

/// Errors that can occur while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No API key could be found in settings or environment.
    #[error("No API key configured: set `api.api_key`, QUILL_API_KEY or OPENAI_API_KEY")]
    MissingApiKey,

    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Setting name.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue { field: field.to_string(), reason: reason.into() }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Upstream API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSettings {
    /// API key (usually supplied through the environment instead).
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Completion token limit.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_timeout_secs() -> f64 {
    60.0
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Retry and backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySettings {
    /// Retries after the first attempt for 429/5xx answers.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Exponential base of the backoff.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,

    /// Backoff multiplier in seconds.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Cap on a single backoff delay, in seconds.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_delay_secs() -> f64 {
    60.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

/// Batch sizing and concurrency settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSettings {
    /// Maximum rows accepted in one invocation.
    #[serde(default = "default_batch_size_limit")]
    pub batch_size_limit: usize,

    /// Configured concurrency ceiling (itself capped at [`HARD_CONCURRENCY_CEILING`]).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Concurrency used when the caller does not ask for one.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,
}

fn default_batch_size_limit() -> usize {
    1000
}

fn default_max_concurrency() -> usize {
    HARD_CONCURRENCY_CEILING
}

fn default_concurrency() -> usize {
    10
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size_limit: default_batch_size_limit(),
            max_concurrency: default_max_concurrency(),
            default_concurrency: default_concurrency(),
        }
    }
}

/// HTTP connection-pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Idle keep-alive connections kept per host.
    #[serde(default = "default_keepalive")]
    pub keepalive: usize,

    /// Maximum simultaneous connections; also bounds the resolved concurrency.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Idle pooled connection lifetime, in seconds.
    #[serde(default = "default_pool_timeout_secs")]
    pub pool_timeout_secs: f64,
}

fn default_keepalive() -> usize {
    20
}

fn default_max_connections() -> usize {
    100
}

fn default_pool_timeout_secs() -> f64 {
    30.0
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            keepalive: default_keepalive(),
            max_connections: default_max_connections(),
            pool_timeout_secs: default_pool_timeout_secs(),
        }
    }
}

impl PoolConfig {
    /// Pool settings for the HTTP model.
    pub fn to_pool_settings(&self) -> ConfigResult<quill_models::PoolSettings> {
        Ok(quill_models::PoolSettings {
            keepalive: self.keepalive,
            idle_timeout: secs_to_duration("pool.pool_timeout_secs", self.pool_timeout_secs)?,
            ..quill_models::PoolSettings::default()
        })
    }
}

/// Reply interpretation settings, including the keyword-scoring fallback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsingSettings {
    /// Whether a row needs a structured interpretation to count as a success.
    #[serde(default)]
    pub require_structured: bool,

    /// Whether keyword scoring is tried when no JSON can be found.
    #[serde(default = "default_true")]
    pub keyword_fallback: bool,

    /// Keywords that signal a positive classification.
    #[serde(default = "default_positive_keywords")]
    pub positive_keywords: Vec<String>,

    /// Keywords that signal a negative classification.
    #[serde(default = "default_negative_keywords")]
    pub negative_keywords: Vec<String>,

    /// Score for a positive classification.
    #[serde(default = "default_positive_score")]
    pub positive_score: f64,

    /// Score for a negative classification.
    #[serde(default = "default_negative_score")]
    pub negative_score: f64,

    /// Score when positive and negative hits balance.
    #[serde(default = "default_neutral_score")]
    pub neutral_score: f64,

    /// Adjustment per additional keyword hit.
    #[serde(default = "default_score_step")]
    pub score_step: f64,

    /// Lower score bound.
    #[serde(default)]
    pub min_score: f64,

    /// Upper score bound.
    #[serde(default = "default_max_score")]
    pub max_score: f64,
}

fn default_true() -> bool {
    true
}

fn default_positive_keywords() -> Vec<String> {
    ["relevant", "include", "accept", "yes", "high quality"].iter().map(|s| (*s).to_string()).collect()
}

fn default_negative_keywords() -> Vec<String> {
    ["irrelevant", "exclude", "reject", "no", "low quality"].iter().map(|s| (*s).to_string()).collect()
}

fn default_positive_score() -> f64 {
    0.8
}

fn default_negative_score() -> f64 {
    0.3
}

fn default_neutral_score() -> f64 {
    0.5
}

fn default_score_step() -> f64 {
    0.05
}

fn default_max_score() -> f64 {
    1.0
}

impl Default for ParsingSettings {
    fn default() -> Self {
        Self {
            require_structured: false,
            keyword_fallback: true,
            positive_keywords: default_positive_keywords(),
            negative_keywords: default_negative_keywords(),
            positive_score: default_positive_score(),
            negative_score: default_negative_score(),
            neutral_score: default_neutral_score(),
            score_step: default_score_step(),
            min_score: 0.0,
            max_score: default_max_score(),
        }
    }
}

/// Prompt rendering settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptSettings {
    /// Fail a row whose template names a placeholder with no matching column.
    #[serde(default)]
    pub strict: bool,

    /// Text substituted for unmatched placeholders when not strict.
    #[serde(default)]
    pub missing_value: Option<String>,
}

impl PromptSettings {
    /// Render options for the prompt template.
    pub fn to_render_options(&self) -> RenderOptions {
        RenderOptions { strict: self.strict, default_value: self.missing_value.clone() }
    }
}

/// Which input columns feed the prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldMapping {
    /// Content column; rows where it is blank are skipped.
    #[serde(default = "default_primary_field")]
    pub primary: String,

    /// Heading column.
    #[serde(default = "default_secondary_field")]
    pub secondary: String,
}

fn default_primary_field() -> String {
    "abstract".to_string()
}

fn default_secondary_field() -> String {
    "title".to_string()
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self { primary: default_primary_field(), secondary: default_secondary_field() }
    }
}

/// Root settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuillSettings {
    /// Upstream API settings.
    #[serde(default)]
    pub api: ApiSettings,
    /// Retry settings.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Batch settings.
    #[serde(default)]
    pub batch: BatchSettings,
    /// Connection-pool settings.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Reply interpretation settings.
    #[serde(default)]
    pub parsing: ParsingSettings,
    /// Input field mapping.
    #[serde(default)]
    pub fields: FieldMapping,
    /// Prompt rendering settings.
    #[serde(default)]
    pub prompts: PromptSettings,
}

impl QuillSettings {
    /// Load settings from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let value = read_toml(path)?;
        value.try_into().map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".quill")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".quillrc")
    }

    /// Discover and load configuration files.
    ///
    /// Keys in the local file override the same keys in the global file; missing files
    /// are ignored.
    pub fn discover_and_load() -> ConfigResult<Self> {
        Self::load_layered(&[Self::default_global_path(), Self::default_local_path()])
    }

    /// Load and deep-merge the given files in order, later files winning.
    pub fn load_layered(paths: &[PathBuf]) -> ConfigResult<Self> {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        for path in paths {
            match read_toml(path) {
                Ok(layer) => {
                    debug!(path = %path.display(), "Loaded configuration layer");
                    merge_toml(&mut merged, layer);
                }
                Err(ConfigError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        merged.try_into().map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `QUILL_*` environment overrides.
    pub fn apply_env(&mut self, env: &dyn EnvSource) -> ConfigResult<()> {
        if let Some(key) = env.var("QUILL_API_KEY").or_else(|| env.var("OPENAI_API_KEY")) {
            self.api.api_key = Some(key);
        }
        if let Some(url) = env.var("QUILL_BASE_URL") {
            self.api.base_url = url;
        }
        if let Some(model) = env.var("QUILL_MODEL") {
            self.api.model = model;
        }
        if let Some(v) = parse_env(env, "QUILL_TEMPERATURE")? {
            self.api.temperature = v;
        }
        if let Some(v) = parse_env(env, "QUILL_MAX_TOKENS")? {
            self.api.max_tokens = v;
        }
        if let Some(v) = parse_env(env, "QUILL_TIMEOUT_SECS")? {
            self.api.timeout_secs = v;
        }
        if let Some(v) = parse_env(env, "QUILL_MAX_RETRIES")? {
            self.retry.max_retries = v;
        }
        if let Some(v) = parse_env(env, "QUILL_MAX_CONCURRENCY")? {
            self.batch.max_concurrency = v;
        }
        if let Some(v) = parse_env(env, "QUILL_STRICT_PROMPTS")? {
            self.prompts.strict = v;
        }
        Ok(())
    }

    /// Validate numeric ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=2.0).contains(&self.api.temperature) {
            return Err(ConfigError::invalid("api.temperature", "must be between 0 and 2"));
        }
        if !self.api.timeout_secs.is_finite() || self.api.timeout_secs <= 0.0 {
            return Err(ConfigError::invalid("api.timeout_secs", "must be greater than 0"));
        }
        secs_to_duration("api.timeout_secs", self.api.timeout_secs)?;
        if self.api.max_tokens == 0 {
            return Err(ConfigError::invalid("api.max_tokens", "must be greater than 0"));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("api.base_url", "must not be empty"));
        }
        if !self.retry.backoff_base.is_finite() || self.retry.backoff_base < 1.0 {
            return Err(ConfigError::invalid("retry.backoff_base", "must be at least 1"));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 0.0 {
            return Err(ConfigError::invalid("retry.backoff_multiplier", "must not be negative"));
        }
        if !self.retry.max_delay_secs.is_finite() || self.retry.max_delay_secs < 0.0 {
            return Err(ConfigError::invalid("retry.max_delay_secs", "must not be negative"));
        }
        secs_to_duration("retry.max_delay_secs", self.retry.max_delay_secs)?;
        if self.batch.batch_size_limit == 0 {
            return Err(ConfigError::invalid("batch.batch_size_limit", "must be greater than 0"));
        }
        if self.pool.max_connections == 0 {
            return Err(ConfigError::invalid("pool.max_connections", "must be greater than 0"));
        }
        if !self.pool.pool_timeout_secs.is_finite() || self.pool.pool_timeout_secs < 0.0 {
            return Err(ConfigError::invalid("pool.pool_timeout_secs", "must not be negative"));
        }
        secs_to_duration("pool.pool_timeout_secs", self.pool.pool_timeout_secs)?;
        if self.parsing.min_score > self.parsing.max_score {
            return Err(ConfigError::invalid("parsing.min_score", "must not exceed parsing.max_score"));
        }
        Ok(())
    }

    /// Copy of the settings with the API key masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.api.api_key = copy.api.api_key.as_deref().map(mask_secret);
        copy
    }
}

fn read_toml(path: &Path) -> ConfigResult<toml::Value> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
    toml::from_str(&content).map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
}

/// Deep-merge `overlay` into `base`; tables merge key by key, everything else replaces.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn parse_env<T: std::str::FromStr>(env: &dyn EnvSource, key: &str) -> ConfigResult<Option<T>> {
    env.var(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| ConfigError::invalid(key, format!("cannot parse '{}'", raw)))
        })
        .transpose()
}

/// Convert a seconds setting, rejecting values a `Duration` cannot hold.
fn secs_to_duration(field: &str, secs: f64) -> ConfigResult<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ConfigError::invalid(field, format!("{} seconds is out of range", secs)))
}

fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    if secret.chars().count() <= 8 { "****".to_string() } else { format!("****{}", visible) }
}

/// Immutable request configuration shared by every row task of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AiRequestConfig {
    /// Bearer token for the upstream.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Completion token limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry and backoff policy.
    pub retry: RetryPolicy,
}

impl AiRequestConfig {
    /// Generation parameters for each request.
    pub fn parameters(&self) -> quill_abstraction::ModelParameters {
        quill_abstraction::ModelParameters {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        }
    }
}

/// Fully resolved, immutable configuration for one pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// Request configuration.
    pub request: AiRequestConfig,
    /// Resolved concurrency limit.
    pub concurrency: usize,
    /// Effective concurrency ceiling that per-call overrides are clamped to.
    pub concurrency_ceiling: usize,
    /// Maximum rows per invocation.
    pub batch_size_limit: usize,
    /// Connection-pool settings.
    pub pool: PoolConfig,
    /// Reply interpretation settings.
    pub parsing: ParsingSettings,
    /// Input field mapping.
    pub fields: FieldMapping,
    /// Prompt rendering settings.
    pub prompts: PromptSettings,
}

impl ResolvedConfig {
    /// Copy of this configuration with a per-call concurrency override applied.
    pub fn with_concurrency(&self, requested: Option<usize>) -> Self {
        let mut copy = self.clone();
        if requested.is_some() {
            copy.concurrency = clamp_concurrency(requested, self.concurrency, self.concurrency_ceiling);
        }
        copy
    }

    /// Load-aware batch size, using `batch_size_limit` as the base limit.
    pub fn recommended_batch_size(&self, total_items: usize, system_load: f64) -> usize {
        recommend_batch_size(self.batch_size_limit, total_items, system_load)
    }
}

/// Caller-supplied overrides applied on top of environment and files.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Requested concurrency.
    pub concurrency: Option<usize>,
    /// Model identifier.
    pub model: Option<String>,
    /// API key.
    pub api_key: Option<String>,
}

/// Merges defaults, files, environment and per-call overrides into a [`ResolvedConfig`].
pub struct ConfigResolver<E: EnvSource = ProcessEnv> {
    settings: QuillSettings,
    env: E,
}

impl ConfigResolver<ProcessEnv> {
    /// Resolver reading the process environment.
    pub fn new(settings: QuillSettings) -> Self {
        Self { settings, env: ProcessEnv }
    }
}

impl<E: EnvSource> ConfigResolver<E> {
    /// Resolver reading the given environment source.
    pub fn with_env(settings: QuillSettings, env: E) -> Self {
        Self { settings, env }
    }

    /// Resolve the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingApiKey` when no key is resolvable, and
    /// `ConfigError::InvalidValue` for out-of-range settings.
    pub fn resolve(&self, overrides: &Overrides) -> ConfigResult<ResolvedConfig> {
        let mut settings = self.settings.clone();
        settings.apply_env(&self.env)?;
        if let Some(model) = &overrides.model {
            settings.api.model.clone_from(model);
        }
        if let Some(key) = &overrides.api_key {
            settings.api.api_key = Some(key.clone());
        }
        settings.validate()?;

        let api_key = settings
            .api
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let ceiling = settings
            .batch
            .max_concurrency
            .min(HARD_CONCURRENCY_CEILING)
            .min(settings.pool.max_connections)
            .max(1);
        let concurrency =
            clamp_concurrency(overrides.concurrency, settings.batch.default_concurrency, ceiling);

        let retry = RetryPolicy::new(
            settings.retry.max_retries,
            settings.retry.backoff_base,
            settings.retry.backoff_multiplier,
            secs_to_duration("retry.max_delay_secs", settings.retry.max_delay_secs)?,
        );

        debug!(
            model = %settings.api.model,
            base_url = %settings.api.base_url,
            concurrency,
            ceiling,
            max_retries = retry.max_retries,
            "Resolved configuration"
        );

        Ok(ResolvedConfig {
            request: AiRequestConfig {
                api_key,
                base_url: settings.api.base_url,
                model: settings.api.model,
                max_tokens: settings.api.max_tokens,
                temperature: settings.api.temperature,
                timeout: secs_to_duration("api.timeout_secs", settings.api.timeout_secs)?,
                retry,
            },
            concurrency,
            concurrency_ceiling: ceiling,
            batch_size_limit: settings.batch.batch_size_limit,
            pool: settings.pool,
            parsing: settings.parsing,
            fields: settings.fields,
            prompts: settings.prompts,
        })
    }
}

/// Clamp a requested concurrency into `1..=ceiling`, falling back to `default`.
fn clamp_concurrency(requested: Option<usize>, default: usize, ceiling: usize) -> usize {
    let wanted = requested.unwrap_or(default);
    if wanted == 0 {
        warn!("Concurrency of 0 requested, using 1");
        1
    } else if wanted > ceiling {
        warn!(requested = wanted, ceiling, "Concurrency clamped to ceiling");
        ceiling
    } else {
        wanted
    }
}
