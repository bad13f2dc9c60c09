//! # Diligence Harness CLI (`dili`)
//!
//! ## Usage
//!
//! ```bash
//! dili --config ./config/dili.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dili document <path>` | Decompose a deck or memo, analyze every page, consolidate |
//! | `dili email <path>` | Extract an email thread (`-` reads stdin) |
//! | `dili call <path>` | Extract a call transcript (`-` reads stdin) |
//! | `dili economics <path>` | Revenue, pricing, and monetization lenses plus a report |
//! | `dili verify <path>` | Fact-check numeric claims and issue a verdict |
//! | `dili report <path>` | Document analysis, then economics and fact-check of its corpus |
//! | `dili batch <dir>` | Analyze every matching document under a directory |
//! | `dili serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Analyze a pitch deck with per-page progress
//! dili document deck.pdf --progress human
//!
//! # Fact-check a memo with at most 3 web lookups, as JSON
//! dili verify memo.txt --quota 3 --json
//!
//! # Pipe a transcript in
//! pbpaste | dili call -
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use diligence_core::{DocumentResult, TextKind, UnitResult};
use diligence_harness::batch::run_batch;
use diligence_harness::config::{self, Config};
use diligence_harness::inference::Secrets;
use diligence_harness::logging::init_logging;
use diligence_harness::pipeline::Analyzer;
use diligence_harness::progress::ProgressMode;
use diligence_harness::server::run_server;

const DEFAULT_CONFIG: &str = "./config/dili.toml";

/// Diligence Harness CLI: page-level document analysis, economics lenses,
/// and numeric fact-checking for startup evaluation artifacts.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dili.example.toml` for a full example. When the
/// default path does not exist, every provider is disabled.
#[derive(Parser)]
#[command(
    name = "dili",
    about = "Diligence Harness: multi-stage analysis of startup documents, emails, and calls",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Debug-level logging (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a PDF, PPTX, or DOCX document page by page.
    Document {
        path: PathBuf,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,

        /// Per-page progress on stderr (default: human on a TTY, else off).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Extract information from an email thread.
    Email {
        /// File to read, or `-` for stdin.
        path: String,

        #[arg(long)]
        json: bool,
    },

    /// Extract information from a call transcript.
    Call {
        /// File to read, or `-` for stdin.
        path: String,

        #[arg(long)]
        json: bool,
    },

    /// Run the three economics lenses and the report synthesis.
    Economics {
        /// File to read, or `-` for stdin.
        path: String,

        #[arg(long)]
        json: bool,
    },

    /// Fact-check numeric claims: normalize, calculate, look up, conclude.
    Verify {
        /// File to read, or `-` for stdin.
        path: String,

        /// Maximum web lookups for this run (overrides `verification.search_quota`).
        #[arg(long)]
        quota: Option<u32>,

        /// Print the report as JSON instead of Markdown.
        #[arg(long)]
        json: bool,
    },

    /// Document analysis followed by economics and fact-check of the corpus.
    Report {
        path: PathBuf,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Analyze every document under a directory matching `pipeline.include_globs`.
    Batch {
        dir: PathBuf,

        #[arg(long)]
        json: bool,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn load(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        info!("no config at {}; all providers disabled", DEFAULT_CONFIG);
        return Ok(Config::minimal());
    }
    config::load_config(path)
}

fn read_text(path: &str) -> Result<String> {
    if path == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_document(result: &DocumentResult) {
    println!(
        "status: {:?}  pages: {}/{} analyzed",
        result.status, result.successful_units, result.total_units
    );
    for unit in result.unit_results.iter().filter(|u| !u.is_success()) {
        println!(
            "  page {} failed: {}",
            unit.ordinal(),
            unit.failure_reason().unwrap_or_default()
        );
    }
    if let Some(summary) = &result.corpus_summary {
        println!("\n{}", summary);
    }
}

fn finish_document(result: &DocumentResult) -> Result<()> {
    match &result.failure_reason {
        Some(reason) if !result.is_success() => anyhow::bail!("document analysis failed: {}", reason),
        _ => Ok(()),
    }
}

fn finish_unit(result: &UnitResult, json: bool) -> Result<()> {
    if json {
        print_json(result)?;
    } else if let Some(text) = result.analysis_text() {
        println!("{}", text);
    }
    match result.failure_reason() {
        Some(reason) => anyhow::bail!("analysis failed: {}", reason),
        None => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut cfg = load(&cli.config)?;
    if let Commands::Verify {
        quota: Some(quota), ..
    } = &cli.command
    {
        cfg.verification.search_quota = *quota;
    }

    let analyzer = Analyzer::from_config(&cfg, Secrets::from_env(&cfg))?;

    match cli.command {
        Commands::Document {
            path,
            json,
            progress,
        } => {
            let bytes = read_bytes(&path)?;
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            let result = analyzer
                .analyze_document_observed(&bytes, reporter.as_ref())
                .await;
            if json {
                print_json(&result)?;
            } else {
                print_document(&result);
            }
            finish_document(&result)?;
        }
        Commands::Email { path, json } => {
            let text = read_text(&path)?;
            let result = analyzer.analyze_text(&text, TextKind::Email).await;
            finish_unit(&result, json)?;
        }
        Commands::Call { path, json } => {
            let text = read_text(&path)?;
            let result = analyzer.analyze_text(&text, TextKind::CallTranscript).await;
            finish_unit(&result, json)?;
        }
        Commands::Economics { path, json } => {
            let text = read_text(&path)?;
            let output = analyzer.run_economics(&text).await;
            if json {
                print_json(&output)?;
            } else if let Some(report) = &output.report {
                println!("{}", report);
            }
            if let Some(reason) = &output.failure_reason {
                anyhow::bail!("economics analysis failed: {}", reason);
            }
        }
        Commands::Verify { path, json, .. } => {
            let text = read_text(&path)?;
            let report = analyzer.verify(&text).await;
            if json {
                print_json(&report)?;
            } else {
                print!("{}", report.to_markdown());
            }
        }
        Commands::Report { path, progress } => {
            let bytes = read_bytes(&path)?;
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            let report = analyzer.full_report(&bytes, reporter.as_ref()).await;
            print_json(&report)?;
            finish_document(&report.document)?;
        }
        Commands::Batch {
            dir,
            json,
            progress,
        } => {
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            let entries =
                run_batch(&analyzer, &dir, &cfg.pipeline.include_globs, reporter.as_ref()).await?;
            if json {
                print_json(&entries)?;
            } else {
                for entry in &entries {
                    println!(
                        "{:<7} {}/{}  {}{}",
                        format!("{:?}", entry.status).to_lowercase(),
                        entry.successful_units,
                        entry.total_units,
                        entry.path.display(),
                        entry
                            .failure_reason
                            .as_ref()
                            .map(|r| format!("  ({})", r))
                            .unwrap_or_default()
                    );
                }
            }
            let failed = entries
                .iter()
                .filter(|e| e.failure_reason.is_some())
                .count();
            info!(files = entries.len(), failed, "batch complete");
        }
        Commands::Serve => {
            run_server(&cfg, analyzer).await?;
        }
    }

    Ok(())
}
