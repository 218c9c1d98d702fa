use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quarry_client::{GreenhouseConnector, HttpClient, RemoteOkConnector, greenhouse, remoteok};
use quarry_core::models::{ExperienceLevel, SearchCriteria};
use quarry_core::traits::CacheTier;
use quarry_core::{
    Aggregator, AggregatorConfig, ConnectorRegistry, FileTier, MemoryTier, TieredCache,
    TracingReporter,
};
use quarry_db::{Database, DatabaseConfig, PgCacheTier};

#[derive(Parser)]
#[command(name = "quarry", version, about = "Resilient multi-source job discovery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover de-duplicated job listings across all configured sources
    Discover {
        /// Title to match (repeatable)
        #[arg(short, long)]
        title: Vec<String>,

        /// Location to match (repeatable)
        #[arg(short, long)]
        location: Vec<String>,

        /// Keyword the description must mention (repeatable)
        #[arg(short, long)]
        keyword: Vec<String>,

        /// Target company, enables career-page sources (repeatable)
        #[arg(short, long)]
        company: Vec<String>,

        /// Experience level (entry, mid, senior, staff, principal, director)
        #[arg(long)]
        level: Option<ExperienceLevel>,

        /// Directory for the on-disk cache tier
        #[arg(long, env = "QUARRY_CACHE_DIR")]
        cache_dir: Option<PathBuf>,

        /// Use the PostgreSQL cache tier (requires DATABASE_URL)
        #[arg(long, default_value_t = false)]
        save: bool,
    },

    /// Delete expired rows from the PostgreSQL cache tier
    PurgeCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("quarry=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Discover {
            title,
            location,
            keyword,
            company,
            level,
            cache_dir,
            save,
        } => {
            let criteria = build_criteria(title, location, keyword, company, level);
            let config = AggregatorConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
            let durable = if save {
                Some(connect_db(&config).await?)
            } else {
                None
            };
            cmd_discover(&criteria, &config, cache_dir, durable).await?;
        }
        Commands::PurgeCache => {
            let config = AggregatorConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
            let tier = connect_db(&config).await?;
            let purged = tier.purge_expired().await.map_err(|e| anyhow::anyhow!(e))?;
            println!("Purged {purged} expired cache entries");
        }
    }

    Ok(())
}

fn build_criteria(
    titles: Vec<String>,
    locations: Vec<String>,
    keywords: Vec<String>,
    companies: Vec<String>,
    level: Option<ExperienceLevel>,
) -> SearchCriteria {
    let criteria = titles.iter().fold(SearchCriteria::new(), |c, t| c.with_title(t));
    let criteria = locations.iter().fold(criteria, |c, l| c.with_location(l));
    let criteria = keywords.iter().fold(criteria, |c, k| c.with_keyword(k));
    let criteria = companies.iter().fold(criteria, |c, co| c.with_company(co));
    match level {
        Some(level) => criteria.with_experience_level(level),
        None => criteria,
    }
}

/// Connect to PostgreSQL using DATABASE_URL and return the durable tier.
async fn connect_db(config: &AggregatorConfig) -> Result<PgCacheTier> {
    let db_config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&db_config)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;

    Ok(db.cache_tier("postgres", config.durable_ttl))
}

fn build_registry(config: &AggregatorConfig) -> Result<ConnectorRegistry> {
    let http = HttpClient::new().map_err(|e| anyhow::anyhow!(e))?;
    let limiter = Arc::new(config.rate_limiter());

    Ok(ConnectorRegistry::new()
        .with(Arc::new(RemoteOkConnector::new(http.clone(), limiter.clone())))
        .with(Arc::new(GreenhouseConnector::new(http, limiter))))
}

async fn cmd_discover(
    criteria: &SearchCriteria,
    config: &AggregatorConfig,
    cache_dir: Option<PathBuf>,
    durable: Option<PgCacheTier>,
) -> Result<()> {
    let mut config = config.clone();
    if config.primary_sources.is_empty() && config.fallback_sources.is_empty() {
        config = config.with_primary_sources([remoteok::SOURCE_ID, greenhouse::SOURCE_ID]);
    }

    let mut tiers: Vec<Arc<dyn CacheTier>> = vec![Arc::new(MemoryTier::new(
        "memory",
        config.memory_ttl,
        config.memory_capacity,
    ))];
    if let Some(dir) = cache_dir {
        tracing::info!(dir = %dir.display(), "Using on-disk cache tier");
        tiers.push(Arc::new(FileTier::new("file", dir, config.durable_ttl)));
    }
    if let Some(tier) = durable {
        tiers.push(Arc::new(tier));
    }

    let registry = build_registry(&config)?;
    let aggregator = Aggregator::from_config(
        &config,
        &registry,
        TieredCache::new(tiers),
        Arc::new(TracingReporter),
    )
    .map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(fingerprint = %criteria.fingerprint(), "Discovering listings");
    let discovery = aggregator.discover(criteria).await;

    for failure in &discovery.failures {
        tracing::warn!(source_id = %failure.source_id, error = %failure.cause, "Source failed");
    }
    if discovery.no_data_available() {
        tracing::warn!("No source answered and no snapshot was available");
    }
    tracing::info!(
        provenance = %discovery.provenance,
        listings = discovery.listings.len(),
        raw = discovery.raw_count,
        "Discovery complete"
    );

    println!("{}", serde_json::to_string_pretty(&discovery)?);
    Ok(())
}
