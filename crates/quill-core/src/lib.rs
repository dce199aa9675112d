//! Quill Core - bounded-concurrency LLM enrichment of tabular data.
//!
//! This crate provides:
//! - Configuration resolution (defaults, files, environment, per-call overrides)
//! - Prompt templates and a stored prompt library
//! - The batch engine: AI client adapter, response interpreter, outcome recorder,
//!   dispatcher, performance monitor and output assembly
//!
//! # Example
//!
//! ```rust,no_run
//! use quill_core::config::{ConfigResolver, Overrides, QuillSettings};
//! use quill_core::{EnrichRequest, EnrichmentPipeline, InputTable};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> quill_core::Result<()> {
//!     let config = ConfigResolver::new(QuillSettings::discover_and_load()?).resolve(&Overrides::default())?;
//!     let pipeline = EnrichmentPipeline::from_config(config)?;
//!     let table = InputTable::from_csv_path(Path::new("papers.csv"))?;
//!     let report = pipeline.run(EnrichRequest::new(table).with_concurrency(8)).await?;
//!     report.artifact.write_csv(Path::new("papers.enriched.csv"))
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod prompts;
pub mod table;

pub use batch::{
    AiClient, AiResponse, Dispatcher, EnrichedTable, OutcomeRecorder, PerformanceMonitor, PerformanceStats,
    ResponseInterpreter, RetryPolicy, RowProgress, RowStatus, RowTask, StatusCounts,
};
pub use config::{ConfigError, ConfigResolver, Overrides, QuillSettings, ResolvedConfig, recommend_batch_size};
pub use error::{EnrichError, Result};
pub use pipeline::{EnrichRequest, EnrichmentPipeline, EnrichmentReport};
pub use prompts::{PromptLibrary, PromptSource, PromptTemplate};
pub use table::InputTable;
