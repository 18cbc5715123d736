mod config;
mod crawler;
mod error;
mod fetch;
mod links;
mod merge;
mod parser;
mod record;
mod store;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::config::{Settings, SourceDescriptor};
use crate::error::RunError;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::merge::MergePolicy;
use crate::parser::patterns::PatternLibrary;
use crate::store::Dataset;

#[derive(Parser)]
#[command(
    name = "equip_scraper",
    about = "Heavy-equipment spec scraper: crawl OEM pages, normalize specs, merge into a CSV/JSON dataset"
)]
struct Cli {
    /// Source descriptors (YAML)
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Directory holding machines.csv and machines.json
    #[arg(long, default_value = store::DEFAULT_OUT_DIR)]
    out_dir: PathBuf,
    /// How re-observed records treat stored values (default: from config)
    #[arg(long, value_enum)]
    policy: Option<MergePolicy>,
    /// Hosts crawled at the same time
    #[arg(long)]
    concurrency: Option<usize>,
    /// Stop fetching after this many seconds and keep what arrived
    #[arg(long)]
    deadline_secs: Option<u64>,
}

struct Summary {
    rows: usize,
    dataset: Dataset,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(summary) => {
            println!(
                "Saved {} rows to {} and {}",
                summary.rows,
                summary.dataset.csv_path.display(),
                summary.dataset.json_path.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(e.exit_code())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        info!("Done in {}", format_duration(elapsed));
    }
    code
}

async fn run(cli: Cli) -> Result<Summary, RunError> {
    let sources = config::load(&cli.config)?;
    let mut settings = sources.settings;
    if let Some(policy) = cli.policy {
        settings.merge_policy = policy;
    }
    if let Some(n) = cli.concurrency {
        settings.concurrency = n;
    }
    if cli.deadline_secs.is_some() {
        settings.deadline_secs = cli.deadline_secs;
    }

    let lib = PatternLibrary::new().context("compiling field patterns")?;
    let fetcher = HttpFetcher::new(&settings).context("building HTTP client")?;
    let dataset = Dataset::in_dir(&cli.out_dir);

    scrape(&sources.seeds, &settings, &lib, Arc::new(fetcher), dataset).await
}

/// Load the stored dataset, crawl, extract, merge and save. An unreadable
/// dataset stops the run before any request goes out.
async fn scrape(
    seeds: &[SourceDescriptor],
    settings: &Settings,
    lib: &PatternLibrary,
    fetcher: Arc<dyn Fetcher>,
    dataset: Dataset,
) -> Result<Summary, RunError> {
    let existing = dataset.load()?;

    // Phase 1: Crawl
    let t_crawl = Instant::now();
    let (pages, stats) = crawler::crawl(seeds, fetcher, settings).await;
    info!(
        "Crawl finished in {}: {} relevant pages, {} errors{}",
        format_duration(t_crawl.elapsed()),
        pages.len(),
        stats.errors,
        if stats.deadline_hit { " (deadline hit)" } else { "" }
    );

    // Phase 2: Extract
    let seen_at = record::now_utc();
    let fresh = parser::process_pages(lib, seeds, &pages, &seen_at);
    info!("Extracted {} records", fresh.len());

    // Phase 3: Merge + save
    let merged = merge::merge(existing, fresh, settings.merge_policy);
    dataset.save(&merged)?;

    Ok(Summary {
        rows: merged.len(),
        dataset,
    })
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

// ── Tests ──
