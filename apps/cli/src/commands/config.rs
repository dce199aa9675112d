//! Configuration commands and settings loading shared by the other commands.

use anyhow::Context;
use clap::Subcommand;
use colored::Colorize;
use quill_core::QuillSettings;
use quill_core::config::ProcessEnv;
use std::path::{Path, PathBuf};

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective settings with the API key masked
    Show {
        /// Settings file (defaults to ~/.quill/config.toml layered under ./.quillrc)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },

    /// Print the locations searched for settings files
    Paths,
}

/// Load settings from `path`, or discover the global and local files.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<QuillSettings> {
    match path {
        Some(path) => QuillSettings::load_from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => QuillSettings::discover_and_load().context("Failed to load settings"),
    }
}

/// Execute a configuration command.
pub fn execute(command: ConfigCommand) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Show { config, json } => show(config.as_deref(), json),
        ConfigCommand::Paths => {
            let global = QuillSettings::default_global_path();
            let local = QuillSettings::default_local_path();
            for (label, path) in [("global", global), ("local", local)] {
                let marker = if path.exists() { "✓".green() } else { "-".dimmed() };
                println!("  {} {:<6} {}", marker, label, path.display());
            }
            Ok(())
        }
    }
}

fn show(path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let mut settings = load_settings(path)?;
    settings.apply_env(&ProcessEnv).context("Invalid environment override")?;
    let redacted = settings.redacted();

    if json {
        println!("{}", serde_json::to_string_pretty(&redacted)?);
    } else {
        println!("{}", toml::to_string_pretty(&redacted).context("Failed to render settings")?);
    }
    Ok(())
}
