//! In-process job store. Not durable; used by tests and database-less runs.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Claim, JobRecord, JobStore};
use crate::error::JobError;

#[derive(Default)]
struct Queues {
    claims: HashMap<String, JobRecord>,
    ready: VecDeque<JobRecord>,
    delayed: Vec<(Instant, JobRecord)>,
}

#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Queues>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding a live job.
    pub async fn live_count(&self) -> usize {
        self.inner.lock().await.claims.len()
    }

    pub async fn queued_len(&self) -> usize {
        let q = self.inner.lock().await;
        q.ready.len() + q.delayed.len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn claim(&self, job: JobRecord) -> Result<Claim, JobError> {
        let mut q = self.inner.lock().await;

        if let Some(existing) = q.claims.get(&job.key) {
            return Ok(Claim::Existing(existing.clone()));
        }

        q.claims.insert(job.key.clone(), job.clone());
        q.ready.push_back(job.clone());
        Ok(Claim::Created(job))
    }

    async fn find(&self, key: &str) -> Result<Option<JobRecord>, JobError> {
        Ok(self.inner.lock().await.claims.get(key).cloned())
    }

    async fn pop(&self) -> Result<Option<JobRecord>, JobError> {
        let mut q = self.inner.lock().await;

        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut q.delayed).into_iter().partition(|(at, _)| *at <= now);
        q.delayed = waiting;
        q.ready.extend(due.into_iter().map(|(_, job)| job));

        while let Some(job) = q.ready.pop_front() {
            match q.claims.get(&job.key) {
                Some(owner) if owner.id == job.id => return Ok(Some(owner.clone())),
                _ => continue,
            }
        }
        Ok(None)
    }

    async fn update(&self, job: &JobRecord) -> Result<bool, JobError> {
        let mut q = self.inner.lock().await;
        match q.claims.get_mut(&job.key) {
            Some(owner) if owner.id == job.id => {
                *owner = job.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn retry_later(&self, job: &JobRecord, delay: Duration) -> Result<(), JobError> {
        let mut q = self.inner.lock().await;
        q.delayed.push((Instant::now() + delay, job.clone()));
        Ok(())
    }

    async fn finish(&self, job: &JobRecord) -> Result<(), JobError> {
        let mut q = self.inner.lock().await;
        if q.claims.get(&job.key).is_some_and(|owner| owner.id == job.id) {
            q.claims.remove(&job.key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{EnrichmentGate, JobStatus};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_second_schedule_is_absorbed() {
        let store = Arc::new(MemoryJobStore::new());
        let gate = EnrichmentGate::new(store.clone());

        let first = gate.schedule("Djokovic N.").await.unwrap();
        let second = gate.schedule("Djokovic N.").await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.live_count().await, 1);
        assert_eq!(store.queued_len().await, 1);
    }

    #[tokio::test]
    async fn test_running_job_still_blocks() {
        let store = Arc::new(MemoryJobStore::new());
        let gate = EnrichmentGate::new(store.clone());

        gate.schedule("Nadal R.").await.unwrap();
        let mut job = store.pop().await.unwrap().unwrap();
        job.status = JobStatus::Running;
        assert!(store.update(&job).await.unwrap());

        let again = gate.schedule("Nadal R.").await.unwrap();
        assert!(!again.created);
        assert_eq!(again.status, JobStatus::Running);

        store.finish(&job).await.unwrap();
        let fresh = gate.schedule("Nadal R.").await.unwrap();
        assert!(fresh.created);
        assert_ne!(fresh.id, job.id);
    }

    #[tokio::test]
    async fn test_stale_entries_skipped() {
        let store = MemoryJobStore::new();
        let job = JobRecord::new("Murray A.");
        store.claim(job.clone()).await.unwrap();
        store.finish(&job).await.unwrap();

        assert!(store.pop().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_delay() {
        let store = MemoryJobStore::new();
        let job = JobRecord::new("Wawrinka S.");
        store.claim(job.clone()).await.unwrap();
        let popped = store.pop().await.unwrap().unwrap();

        store.retry_later(&popped, Duration::from_secs(30)).await.unwrap();
        assert!(store.pop().await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.pop().await.unwrap().map(|j| j.id), Some(job.id));
    }
}
