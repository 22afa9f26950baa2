use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use transaction_enrichment::{
    read_records, write_records, ConfigOverrides, EnrichmentStage, FileConfig, Settings,
};

const DEFAULT_CONFIG_FILE: &str = "enrich.toml";

/// Enrich transaction records with categories from the classification service
#[derive(Debug, Parser)]
#[command(name = "enrich", version)]
struct Cli {
    /// Input records (.csv, .jsonl or .ndjson)
    input: PathBuf,

    /// Output file (`-` for stdout); format follows the extension
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// TOML config file (default: ./enrich.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Classification endpoint (overrides env and config file)
    #[arg(long)]
    url: Option<String>,

    /// Connect timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Read timeout in seconds
    #[arg(long)]
    read_timeout: Option<u64>,

    /// Client identifier sent as User-Agent
    #[arg(long)]
    client_id: Option<String>,

    /// Concurrent classifier calls
    #[arg(short = 'j', long)]
    parallelism: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    eprintln!("🏷️  Transaction Enrichment v{}", transaction_enrichment::VERSION);
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Resolve configuration
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::load_optional(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    let overrides = ConfigOverrides {
        url: cli.url,
        connect_timeout_secs: cli.connect_timeout,
        read_timeout_secs: cli.read_timeout,
        client_id: cli.client_id,
        parallelism: cli.parallelism,
    };
    let settings = Settings::resolve(&file, &overrides)?;

    eprintln!("✓ Classifier: {}", settings.classifier.url);
    eprintln!(
        "✓ Workers: {} (connect timeout {:?}, read timeout {:?})",
        settings.batch.parallelism,
        settings.classifier.connect_timeout,
        settings.classifier.read_timeout
    );

    // 2. Load records
    let records = read_records(&cli.input)
        .with_context(|| format!("Failed to load records from {}", cli.input.display()))?;
    eprintln!("✓ Loaded {} transactions", records.len());

    // 3. Enrich
    let stage = EnrichmentStage::from_config(&settings.classifier)
        .context("Failed to initialize classifier client")?;

    let started = Instant::now();
    let outcome = stage.enrich_batch(records, settings.batch.parallelism);
    let summary = &outcome.summary;

    tracing::info!(
        total = summary.total,
        predicted = summary.predicted,
        unknown = summary.unknown,
        api_error = summary.api_error,
        skipped = summary.skipped,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "batch enriched"
    );

    if summary.exceeds_api_error_ratio(settings.batch.api_error_alert_ratio) {
        tracing::warn!(
            api_error_rate = summary.api_error_rate(),
            threshold = settings.batch.api_error_alert_ratio,
            "high share of API_ERROR records, check the classification service"
        );
    }

    // 4. Write records
    write_records(&cli.output, &outcome.records)
        .with_context(|| format!("Failed to write records to {}", cli.output.display()))?;

    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!("✅ {}", summary.summary());

    Ok(())
}
