//! Tennis match ingestion.
//!
//! Normalizes raw match records, stores them under a (date, winner, loser)
//! natural key, and enriches newly seen players in the background through a
//! deduplicated job queue.

pub mod api;
pub mod config;
pub mod directory;
pub mod error;
pub mod health;
pub mod ingest;
pub mod jobs;
pub mod model;
pub mod normalize;
pub mod resolver;
pub mod store;

/// Default `tracing` setup shared by the binaries.
pub fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tennis_ingestion=info".parse()?),
        )
        .init();
    Ok(())
}
