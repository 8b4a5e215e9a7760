//! Enrichment worker: pops jobs and runs the player resolver under a
//! task-level timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{JobRecord, JobStatus, JobStore};
use crate::error::{JobError, ResolveError};
use crate::resolver::PlayerResolver;

/// What happened to one popped job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Player enriched, already enriched, or not stored at all.
    Done,
    /// The directory has no matching player. Logged and dropped.
    NotFound,
    /// Transient failure; queued again with backoff.
    Retrying { attempt: u32, delay: Duration },
    /// Gave up after a terminal error or too many attempts.
    Failed(String),
    /// Another job took over the key while this one was queued.
    Superseded,
}

/// Doubling stops after this many retries.
const MAX_BACKOFF_DOUBLINGS: u32 = 16;

/// `base * 2^(attempt - 1)`, saturating.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
    base.saturating_mul(1 << doublings)
}

#[derive(Clone)]
pub struct EnrichmentWorker {
    jobs: Arc<dyn JobStore>,
    resolver: Arc<PlayerResolver>,
    timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
    poll_interval: Duration,
}

impl EnrichmentWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        resolver: Arc<PlayerResolver>,
        timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            jobs,
            resolver,
            timeout,
            max_attempts: max_attempts.max(1),
            backoff_base: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Process the next ready job, if any.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, JobError> {
        let Some(mut job) = self.jobs.pop().await? else {
            return Ok(None);
        };

        job.status = JobStatus::Running;
        job.attempts += 1;
        if !self.jobs.update(&job).await? {
            return Ok(Some(JobOutcome::Superseded));
        }

        let result =
            tokio::time::timeout(self.timeout, self.resolver.fill_player_details(&job.key)).await;

        let outcome = match result {
            Ok(Ok(Some(player))) => {
                info!(
                    "Enrichment job {} done for {} (external id {:?})",
                    job.id, job.key, player.external_id
                );
                JobOutcome::Done
            }
            Ok(Ok(None)) => JobOutcome::Done,
            Ok(Err(ResolveError::PlayerNotFound(name))) => {
                warn!("Player {} not found, dropping enrichment job {}", name, job.id);
                JobOutcome::NotFound
            }
            Ok(Err(e)) if e.is_transient() => return self.retry(job, e.to_string()).await.map(Some),
            Ok(Err(e)) => {
                error!("Enrichment job {} for {} failed: {}", job.id, job.key, e);
                JobOutcome::Failed(e.to_string())
            }
            Err(_) => {
                let reason = format!("timed out after {:?}", self.timeout);
                return self.retry(job, reason).await.map(Some);
            }
        };

        self.jobs.finish(&job).await?;
        Ok(Some(outcome))
    }

    async fn retry(&self, mut job: JobRecord, reason: String) -> Result<JobOutcome, JobError> {
        if job.attempts >= self.max_attempts {
            error!(
                "Enrichment job {} for {} gave up after {} attempts: {}",
                job.id, job.key, job.attempts, reason
            );
            self.jobs.finish(&job).await?;
            return Ok(JobOutcome::Failed(reason));
        }

        let delay = backoff_delay(self.backoff_base, job.attempts);
        warn!(
            "Enrichment job {} for {} failed (attempt {}/{}): {}. Retrying in {:?}",
            job.id, job.key, job.attempts, self.max_attempts, reason, delay
        );

        job.status = JobStatus::Queued;
        self.jobs.update(&job).await?;
        self.jobs.retry_later(&job, delay).await?;

        Ok(JobOutcome::Retrying {
            attempt: job.attempts,
            delay,
        })
    }

    /// Consume jobs until `shutdown` flips to true. Stops between jobs only.
    pub async fn run(self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        info!("Enrichment worker {} started", worker_id);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!("Enrichment worker {} job store error: {}", worker_id, e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Enrichment worker {} stopped", worker_id);
    }
}
