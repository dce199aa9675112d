//! Entry point: validate, dispatch, assemble.

use crate::batch::{
    AiClient, BatchJob, CellRef, Dispatcher, EnrichedTable, OutcomeRecorder, PerformanceMonitor, PerformanceStats,
    ProgressCallback, RowTask, StatusCounts,
};
use crate::config::ResolvedConfig;
use crate::error::{EnrichError, Result};
use crate::batch::dispatcher::{PRIMARY_PLACEHOLDER, SECONDARY_PLACEHOLDER};
use crate::prompts::{PromptError, PromptLibrary, PromptSource, PromptTemplate};
use crate::table::InputTable;
use chrono::Utc;
use quill_abstraction::Model;
use quill_models::OpenAICompatibleModel;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// One enrichment invocation.
#[derive(Debug, Clone)]
pub struct EnrichRequest {
    /// Records to enrich.
    pub table: InputTable,
    /// Prompt to render per row.
    pub prompt: PromptSource,
    /// Per-call concurrency override, clamped to the configured ceiling.
    pub concurrency: Option<usize>,
}

impl EnrichRequest {
    /// Request using the default prompt and configured concurrency.
    pub fn new(table: InputTable) -> Self {
        Self { table, prompt: PromptSource::Default, concurrency: None }
    }

    /// Use `prompt` instead of the default prompt.
    #[must_use]
    pub fn with_prompt(mut self, prompt: PromptSource) -> Self {
        self.prompt = prompt;
        self
    }

    /// Override the concurrency limit for this call.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}

/// Everything a completed invocation produced.
#[derive(Debug, Clone)]
pub struct EnrichmentReport {
    /// The augmented artifact.
    pub artifact: EnrichedTable,
    /// Settled row tasks, in input order.
    pub tasks: Vec<RowTask>,
    /// Per-status row counts.
    pub counts: StatusCounts,
    /// Request statistics of this job only.
    pub stats: PerformanceStats,
    /// Concurrency limit the job ran with.
    pub concurrency: usize,
}

/// Runs enrichment batches against one model with one resolved configuration.
pub struct EnrichmentPipeline {
    model: Arc<dyn Model>,
    config: ResolvedConfig,
    library: PromptLibrary,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for EnrichmentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentPipeline")
            .field("model", &self.model.model_id())
            .field("concurrency", &self.config.concurrency)
            .field("prompts", &self.library.ids())
            .finish_non_exhaustive()
    }
}

impl EnrichmentPipeline {
    /// Create a pipeline around an existing model.
    pub fn new(model: Arc<dyn Model>, config: ResolvedConfig) -> Self {
        Self { model, config, library: PromptLibrary::new(), progress: None }
    }

    /// Create a pipeline talking to the configured OpenAI-compatible endpoint.
    ///
    /// # Errors
    ///
    /// Returns `EnrichError::Model` if the HTTP client cannot be built, or
    /// `EnrichError::Configuration` if the pool settings are out of range.
    pub fn from_config(config: ResolvedConfig) -> Result<Self> {
        let model = OpenAICompatibleModel::with_settings(
            config.request.model.clone(),
            config.request.base_url.clone(),
            config.request.api_key.clone(),
            config.request.timeout,
            config.pool.to_pool_settings()?,
        )?;
        Ok(Self::new(Arc::new(model), config))
    }

    /// Use `library` to resolve stored prompt ids.
    #[must_use]
    pub fn with_library(mut self, library: PromptLibrary) -> Self {
        self.library = library;
        self
    }

    /// Invoke `callback` as each row settles.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Resolved configuration.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Identifier of the model in use.
    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Prompt library.
    pub fn library(&self) -> &PromptLibrary {
        &self.library
    }

    /// Enrich every row of `request.table`.
    ///
    /// Bad input and unknown prompt ids are rejected before any request is sent.
    /// Otherwise the call always yields a complete artifact; per-row failures are
    /// recorded in the result column and the summary counts.
    ///
    /// # Errors
    ///
    /// Returns `EnrichError::Validation` for unusable input or prompt selection, and
    /// `EnrichError::Serialization` if the artifact cannot be assembled.
    pub async fn run(&self, request: EnrichRequest) -> Result<EnrichmentReport> {
        let EnrichRequest { table, prompt, concurrency } = request;
        let config = self.config.with_concurrency(concurrency);

        let columns = table.validate(&config.fields, config.batch_size_limit).inspect_err(|e| {
            error!(error = %e, "Rejecting input");
        })?;
        let template = self.library.resolve(&prompt).map_err(|e| match e {
            PromptError::UnknownId(id) => EnrichError::Validation(format!(
                "Unknown prompt id '{id}' (available: {})",
                self.library.ids().join(", ")
            )),
            other => EnrichError::Prompt(other),
        })?;

        warn_unmatched_placeholders(&template, &table.headers, config.prompts.strict);

        let result_column = table.headers.len();
        let tasks = table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                RowTask::new(
                    i,
                    table.record(i),
                    row[columns.primary].clone(),
                    row[columns.secondary].clone(),
                    CellRef { row: i, column: result_column },
                )
            })
            .collect();

        let request_config = Arc::new(config.request.clone());
        let monitor = Arc::new(PerformanceMonitor::new());
        let job = BatchJob {
            tasks,
            request: Arc::clone(&request_config),
            concurrency: config.concurrency,
            template,
            render: config.prompts.to_render_options(),
        };

        let client = AiClient::new(Arc::clone(&self.model), request_config, Arc::clone(&monitor));
        let mut dispatcher = Dispatcher::new(client, OutcomeRecorder::new(&config.parsing));
        if let Some(progress) = &self.progress {
            dispatcher = dispatcher.with_progress(Arc::clone(progress));
        }

        let started = Instant::now();
        let tasks = dispatcher.run(job).await;
        let artifact = EnrichedTable::assemble(&table, &tasks, self.model.model_id(), Utc::now())?;
        let counts = artifact.summary.counts;
        let stats = monitor.stats();

        info!(
            rows = tasks.len(),
            success = counts.success,
            failed = counts.failed,
            skipped = counts.skipped,
            errored = counts.errored,
            retries = stats.retry_count,
            elapsed_ms = started.elapsed().as_millis(),
            "Enrichment finished"
        );

        Ok(EnrichmentReport { artifact, tasks, counts, stats, concurrency: config.concurrency })
    }
}

/// Log placeholders that no column or alias can fill.
fn warn_unmatched_placeholders(template: &PromptTemplate, headers: &[String], strict: bool) {
    let unmatched: Vec<String> = template
        .list_placeholders()
        .into_iter()
        .filter(|name| {
            !name.eq_ignore_ascii_case(PRIMARY_PLACEHOLDER)
                && !name.eq_ignore_ascii_case(SECONDARY_PLACEHOLDER)
                && !headers.iter().any(|h| h.trim().eq_ignore_ascii_case(name))
        })
        .collect();
    if !unmatched.is_empty() {
        warn!(placeholders = ?unmatched, strict, "Prompt placeholders have no matching column");
    }
}
