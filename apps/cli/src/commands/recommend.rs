//! Batch size recommendation command.

use super::config::load_settings;
use anyhow::bail;
use colored::Colorize;
use quill_core::recommend_batch_size;
use std::path::Path;

/// Print the recommended batch size for `total` items at `load`.
pub fn execute(total: usize, load: f64, base: Option<usize>, config: Option<&Path>) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&load) {
        bail!("System load must be between 0 and 1, got {}", load);
    }

    let base = match base {
        Some(base) => base,
        None => load_settings(config)?.batch.batch_size_limit,
    };
    if base == 0 {
        bail!("Base limit must be greater than 0");
    }

    let size = recommend_batch_size(base, total, load);
    println!("{} {}", "Recommended batch size:".bold(), size.to_string().cyan());
    println!("  {}", format!("total={} load={:.2} base={}", total, load, base).dimmed());
    Ok(())
}
