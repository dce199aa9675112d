//! Enrich command implementation.
//!
//! Reads a CSV file, runs every row through the enrichment pipeline and writes the
//! augmented table back out.

use super::config::load_settings;
use anyhow::{Context, bail};
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use quill_core::config::ConfigResolver;
use quill_core::{
    EnrichRequest, EnrichmentPipeline, EnrichmentReport, InputTable, Overrides, PromptLibrary, PromptSource,
    RowProgress,
};
use quill_models::MockModel;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Arguments of `quill enrich`.
#[derive(Args, Debug)]
pub struct EnrichArgs {
    /// Input CSV file with a header row
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output CSV file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Also write the artifact as JSON to this path
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Settings file (defaults to ~/.quill/config.toml layered under ./.quillrc)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stored prompt id
    #[arg(long, conflicts_with_all = ["prompt", "prompt_file"])]
    pub prompt_id: Option<String>,

    /// Literal prompt template, e.g. "Summarize {{abstract}}"
    #[arg(long, conflicts_with = "prompt_file")]
    pub prompt: Option<String>,

    /// File holding a prompt template
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// Directory of stored prompts (*.md, *.txt; id = file stem)
    #[arg(long)]
    pub prompts_dir: Option<PathBuf>,

    /// Concurrent requests (clamped to the configured ceiling)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Model identifier override
    #[arg(long)]
    pub model: Option<String>,

    /// Use the offline mock model instead of the HTTP endpoint
    #[arg(long)]
    pub mock: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Execute the enrich command.
pub async fn execute(args: EnrichArgs) -> anyhow::Result<()> {
    println!("{}", "quill enrich".bold().cyan());
    println!();

    debug!(input = %args.input.display(), output = %args.output.display(), mock = args.mock, "Running enrich");
    let settings = load_settings(args.config.as_deref())?;
    let overrides = Overrides {
        concurrency: args.concurrency,
        model: args.model.clone(),
        api_key: args.mock.then(|| "offline".to_string()),
    };
    let config = ConfigResolver::new(settings).resolve(&overrides).context("Failed to resolve configuration")?;

    let table = InputTable::from_csv_path(&args.input)
        .with_context(|| format!("Failed to read input file: {}", args.input.display()))?;
    println!("  {} Input: {} ({} rows)", "✓".green(), args.input.display(), table.len());

    let mut library = PromptLibrary::new();
    if let Some(dir) = &args.prompts_dir {
        let loaded = library
            .load_dir(dir)
            .with_context(|| format!("Failed to load prompts from {}", dir.display()))?;
        println!("  {} Loaded {} stored prompts", "✓".green(), loaded);
    }
    let prompt = prompt_source(&args)?;

    let concurrency = config.with_concurrency(args.concurrency).concurrency;
    let pipeline = if args.mock {
        let model = MockModel::new(config.request.model.clone());
        EnrichmentPipeline::new(Arc::new(model), config)
    } else {
        EnrichmentPipeline::from_config(config).context("Failed to set up the model client")?
    };
    println!(
        "  {} Model: {}{} (concurrency {})",
        "✓".green(),
        pipeline.model_id().cyan(),
        if args.mock { " [mock]".yellow().to_string() } else { String::new() },
        concurrency
    );
    println!();

    let bar = progress_bar(table.len() as u64, args.no_progress)?;
    let sink = bar.clone();
    let pipeline = pipeline.with_library(library).with_progress(Arc::new(move |p: RowProgress| {
        sink.set_message(p.status.label());
        sink.inc(1);
    }));

    let mut request = EnrichRequest::new(table).with_prompt(prompt);
    request.concurrency = args.concurrency;

    let started = Instant::now();
    let report = pipeline.run(request).await;
    bar.finish_and_clear();
    let report = report.context("Enrichment failed")?;

    report
        .artifact
        .write_csv(&args.output)
        .with_context(|| format!("Failed to write output file: {}", args.output.display()))?;
    if let Some(json) = &args.json {
        report.artifact.write_json(json).with_context(|| format!("Failed to write JSON file: {}", json.display()))?;
    }

    print_summary(&report, started.elapsed().as_secs_f64());
    println!();
    println!("  {} Wrote {}", "✓".green(), args.output.display());
    if let Some(json) = &args.json {
        println!("  {} Wrote {}", "✓".green(), json.display());
    }
    Ok(())
}

fn prompt_source(args: &EnrichArgs) -> anyhow::Result<PromptSource> {
    if let Some(id) = &args.prompt_id {
        return Ok(PromptSource::Stored(id.clone()));
    }
    if let Some(text) = &args.prompt {
        if text.trim().is_empty() {
            bail!("Prompt must not be empty");
        }
        return Ok(PromptSource::Literal(text.clone()));
    }
    if let Some(path) = &args.prompt_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
        return Ok(PromptSource::Literal(text));
    }
    Ok(PromptSource::Default)
}

fn progress_bar(total: u64, hidden: bool) -> anyhow::Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} rows {msg}")
            .context("Invalid progress template")?
            .progress_chars("=> "),
    );
    Ok(bar)
}

fn print_summary(report: &EnrichmentReport, elapsed_secs: f64) {
    let counts = report.counts;
    let stats = report.stats;

    println!("{}", "Results".bold());
    println!("  {:<9} {}", "Success:", counts.success.to_string().green());
    println!("  {:<9} {}", "Failed:", counts.failed.to_string().red());
    println!("  {:<9} {}", "Skipped:", counts.skipped.to_string().yellow());
    println!("  {:<9} {}", "Errored:", counts.errored.to_string().red());
    println!();
    println!("{}", "Performance".bold());
    println!("  Requests:      {}", stats.total_requests);
    println!("  Success rate:  {:.1}%", stats.success_rate);
    println!("  Retries:       {}", stats.retry_count);
    println!(
        "  Tokens:        {} ({} prompt, {} completion)",
        stats.total_tokens(),
        stats.prompt_tokens,
        stats.completion_tokens
    );
    println!("  Avg per row:   {} ms", stats.average_processing_time.as_millis());
    println!("  Wall time:     {:.2}s", elapsed_secs);
}
