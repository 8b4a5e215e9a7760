//! Enrichment job queue with a per-player dedup gate.
//!
//! At most one queued or running enrichment job exists per player key. The
//! claim lives in the job store (Redis in production), so the guarantee holds
//! across process restarts and between concurrent schedulers.

pub mod memory;
pub mod redis;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::JobError;

pub use self::memory::MemoryJobStore;
pub use self::redis::RedisJobStore;
pub use self::worker::{EnrichmentWorker, JobOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
}

/// One enrichment job, keyed by the player's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub key: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(key: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.to_string(),
            status: JobStatus::Queued,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The key was free; this job now owns it and is queued.
    Created(JobRecord),
    /// A live job already owns the key.
    Existing(JobRecord),
}

impl Claim {
    pub fn record(&self) -> &JobRecord {
        match self {
            Claim::Created(r) | Claim::Existing(r) => r,
        }
    }

    pub fn into_record(self) -> JobRecord {
        match self {
            Claim::Created(r) | Claim::Existing(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Claim::Created(_))
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically claim `job.key` and enqueue `job`, unless a live job already
    /// holds the key, in which case that job is returned untouched.
    async fn claim(&self, job: JobRecord) -> Result<Claim, JobError>;

    /// The live job for a key, if any.
    async fn find(&self, key: &str) -> Result<Option<JobRecord>, JobError>;

    /// Next ready job. Due retries are promoted first. Entries whose claim
    /// has moved on to another job id are discarded.
    async fn pop(&self) -> Result<Option<JobRecord>, JobError>;

    /// Overwrite the claim record, only if `job.id` still owns the key.
    async fn update(&self, job: &JobRecord) -> Result<bool, JobError>;

    /// Queue `job` again once `delay` has elapsed. The claim is kept.
    async fn retry_later(&self, job: &JobRecord, delay: Duration) -> Result<(), JobError>;

    /// Release the claim held by `job.id`.
    async fn finish(&self, job: &JobRecord) -> Result<(), JobError>;
}

/// Handle returned to schedulers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: Uuid,
    pub key: String,
    pub status: JobStatus,
    /// False when the request was absorbed by an already-live job.
    pub created: bool,
}

impl From<Claim> for JobHandle {
    fn from(claim: Claim) -> Self {
        let created = claim.is_new();
        let record = claim.into_record();
        Self {
            id: record.id,
            key: record.key,
            status: record.status,
            created,
        }
    }
}

/// Entry point for scheduling player enrichment.
#[derive(Clone)]
pub struct EnrichmentGate {
    jobs: Arc<dyn JobStore>,
}

impl EnrichmentGate {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// Schedule enrichment for `player_key` unless a job for it is already
    /// queued or running. Idempotent.
    pub async fn schedule(&self, player_key: &str) -> Result<JobHandle, JobError> {
        let claim = self.jobs.claim(JobRecord::new(player_key)).await?;

        if claim.is_new() {
            info!("Scheduled enrichment job for player: {}", player_key);
        } else {
            info!(
                "Enrichment for player {} already pending (job {})",
                player_key,
                claim.record().id
            );
        }

        Ok(claim.into())
    }
}
