//! Batch enrichment engine: bounded-concurrency dispatch of one upstream request per row.

pub mod aggregator;
pub mod client;
pub mod dispatcher;
pub mod interpreter;
pub mod monitor;
pub mod recorder;
pub mod types;

pub use aggregator::{EnrichedTable, MAX_COLUMN_WIDTH, SummaryMetadata};
pub use client::AiClient;
pub use dispatcher::Dispatcher;
pub use interpreter::{
    EnclosedJson, InterpretError, Interpretation, KeywordScore, ParseStrategy, ResponseInterpreter, StrictJson,
};
pub use monitor::{PerformanceMonitor, PerformanceStats};
pub use recorder::{Classification, OutcomeRecorder, RowOutcome};
pub use types::{
    AiResponse, BatchJob, CellRef, ProgressCallback, RetryPolicy, RowProgress, RowStatus, RowTask, StatusCounts,
};
