//! Tennis Match Ingestion Service
//!
//! Serves the match insertion API and runs the player enrichment workers.
//! Matches go to Postgres; enrichment jobs are deduplicated through Redis.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use tennis_ingestion::api::{self, AppState};
use tennis_ingestion::config::Config;
use tennis_ingestion::directory::AtpDirectory;
use tennis_ingestion::health::HealthState;
use tennis_ingestion::ingest::MatchIngestionService;
use tennis_ingestion::jobs::{EnrichmentGate, EnrichmentWorker, RedisJobStore};
use tennis_ingestion::resolver::PlayerResolver;
use tennis_ingestion::store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tennis_ingestion::init_tracing()?;

    info!("Tennis Match Ingestion Service v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let store = PgStore::connect_with_retry(&config.database_url, 5).await?;
    store
        .ensure_schema()
        .await
        .context("Failed to create database schema")?;
    let store = Arc::new(store);

    let jobs = Arc::new(
        RedisJobStore::connect_with_retry(&config.redis_url, 5, config.enrich_claim_ttl).await?,
    );

    let directory = Arc::new(
        AtpDirectory::new(
            &config.atp_base_url,
            config.flaresolverr_api.clone(),
            config.atp_requests_per_minute,
        )
        .context("Failed to create player directory client")?,
    );
    if config.flaresolverr_api.is_some() {
        info!("Player directory requests go through FlareSolverr");
    }

    let resolver = Arc::new(PlayerResolver::new(store.clone(), directory));
    let gate = EnrichmentGate::new(jobs.clone());
    let ingestion = MatchIngestionService::new(store.clone(), gate);

    // Enrichment worker pool
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::with_capacity(config.enrich_workers);
    for worker_id in 0..config.enrich_workers.max(1) {
        let worker = EnrichmentWorker::new(
            jobs.clone(),
            resolver.clone(),
            config.enrich_timeout,
            config.enrich_max_attempts,
        );
        workers.push(tokio::spawn(worker.run(worker_id, shutdown_rx.clone())));
    }
    info!(
        "Started {} enrichment workers (timeout {:?}, max attempts {})",
        workers.len(),
        config.enrich_timeout,
        config.enrich_max_attempts
    );

    let app = api::router(AppState {
        ingestion,
        health: HealthState::new(),
        api_key: config.api_key.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API listening on {}", addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
        info!("Shutting down...");
    });

    if let Err(e) = server.await {
        error!("Server error: {:?}", e);
    }

    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Enrichment worker panicked: {}", e);
        }
    }

    Ok(())
}
