use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;

use rss_insight::config::Config;
use rss_insight::error::{AppError, Result};
use rss_insight::feed::{curate, FeedFetcher, SourceCatalog};
use rss_insight::pipeline::{self, Pipeline};

#[derive(Parser)]
#[command(name = "rss-insight")]
#[command(about = "Collect engineering blog feeds and enrich them with keywords", long_about = None)]
struct Cli {
    /// Config file (defaults to the per-user config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every catalog source, archive new posts and store them
    Collect {
        /// Source catalog (.json or .opml), overriding catalog_path
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Annotate unanalyzed posts from the given archive keys and any
    /// archives still holding unanalyzed posts
    Enrich {
        keys: Vec<String>,
    },
    /// Collect, then enrich what was collected
    Run {
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Measure feeds and write a catalog of those with long enough entries
    Curate {
        /// Minimum average plain-text length of a feed's entries
        #[arg(long, default_value_t = 1000)]
        min_avg_chars: usize,
        /// Where to write the curated JSON catalog
        #[arg(long)]
        output: PathBuf,
        /// Candidate catalog (.json or .opml)
        catalog: PathBuf,
    },
}

#[derive(Serialize)]
struct RunReport {
    collection: pipeline::CollectionReport,
    enrichment: pipeline::EnrichmentReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Collect { catalog } => {
            let sources = load_catalog(&config, catalog.as_deref())?;
            let pipeline = Pipeline::from_config(&config).await?;
            let report = pipeline.collect(sources.into_sources()).await?;
            print_json(&report)?;
        }
        Commands::Enrich { keys } => {
            let pipeline = Pipeline::from_config(&config).await?;
            let report = pipeline.enrich(&keys).await?;
            print_json(&report)?;
        }
        Commands::Run { catalog } => {
            let sources = load_catalog(&config, catalog.as_deref())?;
            let pipeline = Pipeline::from_config(&config).await?;
            let collection = pipeline.collect(sources.into_sources()).await?;
            let enrichment = pipeline.enrich(&collection.archive_keys).await?;
            print_json(&RunReport {
                collection,
                enrichment,
            })?;
        }
        Commands::Curate {
            min_avg_chars,
            output,
            catalog,
        } => {
            let candidates = SourceCatalog::load(&catalog)?;
            let fetcher = FeedFetcher::http()?;
            let (curated, measurements) =
                curate(&fetcher, candidates.into_sources(), min_avg_chars, config.concurrency).await;
            curated.save(&output)?;
            tracing::info!(kept = curated.len(), measured = measurements.len(), output = %output.display(), "wrote catalog");
            print_json(&measurements)?;
        }
    }

    Ok(())
}

fn load_catalog<'a>(config: &'a Config, path: Option<&'a Path>) -> Result<SourceCatalog> {
    let path = path.unwrap_or_else(|| Path::new(&config.catalog_path));
    let catalog = SourceCatalog::load(path)
        .map_err(|e| AppError::Config(format!("cannot load catalog {}: {}", path.display(), e)))?;
    if catalog.is_empty() {
        tracing::warn!(path = %path.display(), "catalog has no sources");
    }
    Ok(catalog)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
