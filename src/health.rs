//! Ingestion health counters shared with the `/health` endpoint.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct HealthState {
    pub last_ingest_time: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub inserted_total: Arc<RwLock<usize>>,
    pub error_count: Arc<RwLock<usize>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self, inserted: usize) {
        *self.last_ingest_time.write().await = Some(Utc::now());
        *self.inserted_total.write().await += inserted;
        *self.error_count.write().await = 0;
    }

    /// A pass that stored some records and failed others still counts as an error.
    pub async fn record_partial(&self, inserted: usize) {
        *self.last_ingest_time.write().await = Some(Utc::now());
        *self.inserted_total.write().await += inserted;
        *self.error_count.write().await += 1;
    }

    pub async fn record_error(&self) {
        *self.error_count.write().await += 1;
    }

    pub async fn consecutive_errors(&self) -> usize {
        *self.error_count.read().await
    }
}
