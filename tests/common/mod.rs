#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tennis_ingestion::directory::{PlayerCandidate, PlayerDirectory};
use tennis_ingestion::error::DirectoryError;
use tennis_ingestion::ingest::MatchIngestionService;
use tennis_ingestion::jobs::{EnrichmentGate, MemoryJobStore};
use tennis_ingestion::model::PlayerProfile;
use tennis_ingestion::normalize::RawRecord;
use tennis_ingestion::store::MemoryStore;

pub fn record(value: Value) -> RawRecord {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn raw_match(date: &str, winner: &str, loser: &str) -> RawRecord {
    record(json!({
        "Date": date,
        "Comment": "Completed",
        "Winner": winner,
        "Loser": loser,
        "Round": "The Final",
        "Court": "Outdoor",
        "Surface": "Grass",
        "Series": "Grand Slam",
        "Location": "London",
        "Tournament": "Wimbledon",
        "WRank": 1,
        "WPts": 4000,
        "LRank": 2,
        "LPts": 3000,
        "B365W": 1.2,
        "B365L": 4.5
    }))
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub jobs: Arc<MemoryJobStore>,
    pub service: MatchIngestionService,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let jobs = Arc::new(MemoryJobStore::new());
    let service = MatchIngestionService::new(store.clone(), EnrichmentGate::new(jobs.clone()));
    Harness {
        store,
        jobs,
        service,
    }
}

pub fn candidate(id: &str, first: &str, last: &str) -> PlayerCandidate {
    PlayerCandidate {
        external_id: id.to_string(),
        first_name: first.to_string(),
        last_name: last.to_string(),
        country: None,
        active: true,
    }
}

pub fn profile(first: &str, last: &str, nationality: &str) -> PlayerProfile {
    PlayerProfile {
        nationality: Some(nationality.to_string()),
        first_name: Some(first.to_string()),
        last_name: Some(last.to_string()),
        play_hand: Some("R".to_string()),
        back_hand: Some("2".to_string()),
        height_cm: Some(188),
        weight_kg: Some(80),
        birth_date: None,
        pro_year: Some(2003),
    }
}

/// Scripted player directory. Search returns the whole pool, so name
/// filtering stays the resolver's job.
#[derive(Default)]
pub struct FakeDirectory {
    pub pool: Vec<PlayerCandidate>,
    pub profiles: HashMap<String, PlayerProfile>,
    /// Number of upcoming calls that fail with a transient error.
    pub transient_failures: AtomicUsize,
    pub delay: Option<Duration>,
    pub searches: AtomicUsize,
    pub detail_calls: AtomicUsize,
}

impl FakeDirectory {
    pub fn with_player(mut self, c: PlayerCandidate, p: PlayerProfile) -> Self {
        self.profiles.insert(c.external_id.clone(), p);
        self.pool.push(c);
        self
    }

    pub fn with_candidate(mut self, c: PlayerCandidate) -> Self {
        self.pool.push(c);
        self
    }

    pub fn failing(self, times: usize) -> Self {
        self.transient_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn maybe_fail(&self) -> Result<(), DirectoryError> {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DirectoryError::Transient("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PlayerDirectory for FakeDirectory {
    async fn search(&self, _last_name: &str) -> Result<Vec<PlayerCandidate>, DirectoryError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.maybe_fail()?;
        Ok(self.pool.clone())
    }

    async fn details(&self, external_id: &str) -> Result<PlayerProfile, DirectoryError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        self.profiles
            .get(external_id)
            .cloned()
            .ok_or_else(|| DirectoryError::Rejected {
                status: 404,
                body: format!("no player {external_id}"),
            })
    }
}
