//! scoreline - check line-split MusicXML works for silent attribute changes
//! and write corrected copies of the lines that can be repaired.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scoreline::pipeline::{combine, corrections_by_strategy, write_corrections};
use scoreline::{Config, DirectorySource, Session, Validator};

/// Command-line arguments for scoreline
#[derive(Parser, Debug)]
#[command(name = "scoreline")]
#[command(about = "Cross-line clef, key and time signature checker for MusicXML line transcriptions")]
#[command(version)]
struct Args {
    /// Directory with one subdirectory of line files per work
    root: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write the JSON report
    #[arg(long)]
    report: Option<PathBuf>,

    /// Directory for corrected copies
    #[arg(long)]
    corrections: Option<PathBuf>,

    /// Treat time signatures of equal measure length as unchanged
    #[arg(long)]
    time_equivalence: bool,

    /// Only check, do not write corrected copies
    #[arg(long)]
    no_repair: bool,

    /// Only validate these works (repeatable)
    #[arg(short, long = "work")]
    works: Vec<String>,

    /// Session token for the document source
    #[arg(long, env = "SCORELINE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load config '{}'", path.display()))?,
            None => Config::default(),
        };
        if let Some(report) = &self.report {
            config.output.report = report.clone();
        }
        if let Some(corrections) = &self.corrections {
            config.output.corrections = corrections.clone();
        }
        if self.time_equivalence {
            config.check.time_equivalence = true;
        }
        if self.no_repair {
            config.repair.duplicate_declarations = false;
            config.repair.neighbor_propagation = false;
        }
        Ok(config)
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let default_filter = if args.verbose { "scoreline=debug" } else { "scoreline=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.resolve_config()?;
    let session = Session {
        token: args.token.clone(),
    };
    let source = DirectorySource::new(&args.root);
    info!("Checking works under {}", args.root.display());

    let outcomes = Validator::new(&source, &session, &config)
        .validate_works(&args.works)
        .with_context(|| format!("Failed to list works under '{}'", args.root.display()))?;
    let work_count = outcomes.len();
    let (report, corrections) = combine(outcomes);

    report
        .save(&config.output.report)
        .with_context(|| format!("Failed to write report '{}'", config.output.report.display()))?;
    info!("Report written to {}", config.output.report.display());

    write_corrections(&config.output.corrections, &corrections).with_context(|| {
        format!(
            "Failed to write corrections under '{}'",
            config.output.corrections.display()
        )
    })?;

    let per_strategy: Vec<String> = corrections_by_strategy(&corrections)
        .into_iter()
        .map(|(strategy, count)| format!("{count} {strategy}"))
        .collect();
    println!(
        "{work_count} works, {} findings, {} faults, corrections: [{}]",
        report.error_count(),
        report.faults.len(),
        per_strategy.join(", ")
    );

    Ok(if report.faults.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
