//! Quill CLI - enrich spreadsheets of publications with an LLM.
//!
//! Provides the `quill` command: `enrich` runs a batch, `recommend-batch-size`
//! exposes the load-aware sizing heuristic and `config` inspects settings.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use commands::{config, enrich, recommend};

/// Quill - bounded-concurrency LLM enrichment of tabular data
#[derive(Parser, Debug)]
#[command(
    name = "quill",
    author,
    version,
    about = "Quill - enrich tabular records with an OpenAI-compatible model",
    long_about = "Quill sends one chat-completion request per input row under a global concurrency ceiling,\n\
                  retries throttled requests with backoff, and writes the input back out with a result column\n\
                  and per-status summary rows."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enrich every row of a CSV file
    ///
    /// Rows with an empty content field are skipped without a request. Per-row
    /// failures are written into the result column; the run only fails for bad
    /// input or configuration.
    Enrich(enrich::EnrichArgs),

    /// Recommend a batch size for the current system load
    RecommendBatchSize {
        /// Total number of items to process
        #[arg(long)]
        total: usize,

        /// System load between 0 and 1
        #[arg(long)]
        load: f64,

        /// Base limit (defaults to `batch.batch_size_limit`)
        #[arg(long)]
        base: Option<usize>,

        /// Settings file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Inspect configuration
    #[command(subcommand)]
    Config(config::ConfigCommand),
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    match args.command {
        Command::Enrich(enrich_args) => enrich::execute(enrich_args).await,
        Command::RecommendBatchSize { total, load, base, config } => {
            recommend::execute(total, load, base, config.as_deref())
        }
        Command::Config(command) => config::execute(command),
    }
}
