//! Bulk match importer.
//!
//! Reads a JSON array of raw match records and pushes it through the batch
//! ingestion path in chunks. Existing matches are skipped by default, so the
//! same season file can be replayed safely.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use tennis_ingestion::ingest::MatchIngestionService;
use tennis_ingestion::jobs::{EnrichmentGate, RedisJobStore};
use tennis_ingestion::normalize::RawRecord;
use tennis_ingestion::store::{IdentityStore, PgStore};

#[derive(Parser, Debug)]
#[command(name = "import-matches")]
#[command(about = "Import raw tennis match records into the match database")]
struct Cli {
    /// JSON file holding an array of raw match records
    file: PathBuf,

    /// Records per batch
    #[arg(long, default_value_t = 100)]
    chunk_size: usize,

    /// Fail duplicates instead of skipping them
    #[arg(long)]
    strict: bool,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "REDIS_URL")]
    redis_url: String,

    /// Lease on each enrichment claim, in seconds
    #[arg(long, env = "ENRICH_CLAIM_TTL_SECONDS", default_value_t = 86400)]
    claim_ttl_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tennis_ingestion::init_tracing()?;

    let cli = Cli::parse();
    if cli.chunk_size == 0 {
        bail!("--chunk-size must be positive");
    }

    let content = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("Failed to read {}", cli.file.display()))?;
    let records: Vec<RawRecord> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of records", cli.file.display()))?;
    info!("Loaded {} raw records from {}", records.len(), cli.file.display());

    let store = PgStore::connect_with_retry(&cli.database_url, 5).await?;
    store.ensure_schema().await?;
    let store = Arc::new(store);
    let jobs = Arc::new(
        RedisJobStore::connect_with_retry(
            &cli.redis_url,
            5,
            std::time::Duration::from_secs(cli.claim_ttl_seconds),
        )
        .await?,
    );

    let service = MatchIngestionService::new(store.clone(), EnrichmentGate::new(jobs));
    let before = store.count_matches().await?;

    let (mut inserted, mut skipped, mut errors) = (0usize, 0usize, 0usize);
    for (n, chunk) in records.chunks(cli.chunk_size).enumerate() {
        let summary = service.insert_batch_matches(chunk, !cli.strict).await;
        inserted += summary.inserted.len();
        skipped += summary.skipped;
        errors += summary.error_count;

        if !summary.is_clean() {
            warn!("Chunk {}: {} errors", n, summary.error_count);
        }
    }

    let after = store.count_matches().await?;
    info!(
        "Import finished: {} inserted, {} skipped, {} errors ({} -> {} matches)",
        inserted, skipped, errors, before, after
    );

    if errors > 0 {
        bail!("{} matches inserted, {} errors", inserted, errors);
    }
    Ok(())
}
