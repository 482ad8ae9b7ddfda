//! ThreatLens CLI
//!
//! Enrich threat indicators against reputation providers and phishing feeds.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing::{warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lens_core::{Indicator, IndicatorType};
use lens_feeds::HttpFeedSource;
use lens_runtime::{build_assessor, build_registry, InMemoryRepository, Settings};

#[derive(Parser)]
#[command(name = "threatlens")]
#[command(author, version, about = "ThreatLens: threat indicator enrichment and risk scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML); defaults plus environment keys when omitted
    #[arg(short, long, global = true, env = "THREATLENS_CONFIG")]
    config: Option<PathBuf>,

    /// Verbosity level (0-3), overridden by RUST_LOG
    #[arg(short, long, global = true, default_value = "1")]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich and score a single indicator
    Enrich {
        /// Indicator value (IP, domain, URL, hash or email)
        value: String,

        /// Indicator type; detected from the value when omitted
        #[arg(short = 't', long = "type")]
        indicator_type: Option<IndicatorType>,

        /// Ask the configured LLM for a judgment as well (implied by `reasoning.enabled`)
        #[arg(long)]
        reason: bool,
    },

    /// Enrich every indicator in a file (one per line, `#` comments)
    Batch {
        file: PathBuf,
    },

    /// List the adapters that would be registered with these settings
    Adapters,

    /// Validate settings and print them with secrets redacted
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(log_level).into())
        .from_env_lossy();

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Enrich {
            value,
            indicator_type,
            reason,
        } => enrich(&settings, &value, indicator_type, reason).await,
        Commands::Batch { file } => batch(&settings, &file).await,
        Commands::Adapters => adapters(&settings).await,
        Commands::CheckConfig => check_config(&settings),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Settings::from_env().context("Invalid settings"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn enrich(
    settings: &Settings,
    value: &str,
    indicator_type: Option<IndicatorType>,
    reason: bool,
) -> Result<()> {
    let indicator = match indicator_type {
        Some(t) => Indicator::typed(t, value),
        None => Indicator::parse(value),
    }
    .with_context(|| format!("Invalid indicator: {}", value))?;

    let assessor = build_assessor(
        settings,
        InMemoryRepository::shared(),
        reason || settings.reasoning.enabled,
    )
    .await?;
    let assessment = assessor.assess(&indicator).await;
    print_json(&assessment)
}

/// Parse a batch file, skipping blanks, comments and unparseable lines
fn read_indicators(text: &str) -> Vec<Indicator> {
    text.lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match Indicator::parse(line) {
                Ok(indicator) => Some(indicator),
                Err(e) => {
                    warn!(line = idx + 1, error = %e, "Skipping line");
                    None
                }
            }
        })
        .collect()
}

async fn batch(settings: &Settings, file: &Path) -> Result<()> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let indicators = read_indicators(&text);
    if indicators.is_empty() {
        anyhow::bail!("No indicators found in {}", file.display());
    }

    let assessor = build_assessor(settings, InMemoryRepository::shared(), false).await?;
    let assessments = assessor.assess_batch(&indicators).await;
    print_json(&assessments)
}

#[derive(Serialize)]
struct AdapterListing {
    key: String,
    handles: Vec<IndicatorType>,
}

async fn adapters(settings: &Settings) -> Result<()> {
    let source = HttpFeedSource::shared(&settings.http_config())?;
    let registry = build_registry(settings, source).await?;

    let listing: Vec<AdapterListing> = registry
        .list()
        .into_iter()
        .map(|key| {
            let handles = IndicatorType::ALL
                .iter()
                .copied()
                .filter(|t| registry.adapters_for(*t).iter().any(|a| a.key() == key))
                .collect();
            AdapterListing { key, handles }
        })
        .collect();
    print_json(&listing)
}

fn redact(secret: &mut Option<String>) {
    if secret.is_some() {
        *secret = Some("***".to_string());
    }
}

fn redacted(settings: &Settings) -> Settings {
    let mut shown = settings.clone();
    shown.providers.values_mut().for_each(|p| redact(&mut p.api_key));
    redact(&mut shown.reasoning.api_key);
    shown
}

fn check_config(settings: &Settings) -> Result<()> {
    print_json(&redacted(settings))
}
