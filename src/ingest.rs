//! Match ingestion service: normalize, insert, then schedule enrichment.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::IngestError;
use crate::jobs::EnrichmentGate;
use crate::model::{Match, NewMatch, Player};
use crate::normalize::{parse_raw_match, RawRecord};
use crate::store::IdentityStore;

/// Result of a single-record insertion.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Inserted(Match),
    /// Natural key already present and the caller asked to skip conflicts.
    /// Carries the normalized, never-persisted match.
    Skipped(NewMatch),
}

impl Ingested {
    pub fn match_id(&self) -> Option<i64> {
        match self {
            Ingested::Inserted(m) => Some(m.id),
            Ingested::Skipped(_) => None,
        }
    }
}

/// Outcome of a batch pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Persisted matches, in input order.
    pub inserted: Vec<Match>,
    /// Duplicates absorbed by the skip policy.
    pub skipped: usize,
    pub error_count: usize,
}

impl BatchSummary {
    pub fn match_ids(&self) -> Vec<i64> {
        self.inserted.iter().map(|m| m.id).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.error_count == 0
    }
}

#[derive(Clone)]
pub struct MatchIngestionService {
    store: Arc<dyn IdentityStore>,
    gate: EnrichmentGate,
}

impl MatchIngestionService {
    pub fn new(store: Arc<dyn IdentityStore>, gate: EnrichmentGate) -> Self {
        Self { store, gate }
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Insert one raw record.
    ///
    /// A natural-key collision is returned as [`Ingested::Skipped`] when
    /// `on_conflict_skip` is set, and as a duplicate error otherwise.
    pub async fn insert_new_match(
        &self,
        raw: &RawRecord,
        on_conflict_skip: bool,
    ) -> Result<Ingested, IngestError> {
        let new_match = parse_raw_match(raw)?;

        let stored = match self.store.insert_match(&new_match).await {
            Ok(m) => m,
            Err(e) if e.is_duplicate() && on_conflict_skip => {
                warn!("Match already exists, skipping: {}", e);
                return Ok(Ingested::Skipped(new_match));
            }
            Err(e) => {
                error!("Error inserting match: {}", e);
                return Err(e.into());
            }
        };

        self.request_enrichment(&stored.winner).await;
        self.request_enrichment(&stored.loser).await;

        Ok(Ingested::Inserted(stored))
    }

    /// Insert records one by one, each in its own transaction. Failures are
    /// counted and never stop the pass.
    pub async fn insert_batch_matches(
        &self,
        raws: &[RawRecord],
        on_conflict_skip: bool,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for (index, raw) in raws.iter().enumerate() {
            match self.insert_new_match(raw, on_conflict_skip).await {
                Ok(Ingested::Inserted(m)) => summary.inserted.push(m),
                Ok(Ingested::Skipped(_)) => summary.skipped += 1,
                Err(e) => {
                    warn!("Batch record {} rejected: {}", index, e);
                    summary.error_count += 1;
                }
            }
        }

        info!(
            "Batch done: {} inserted, {} skipped, {} errors",
            summary.inserted.len(),
            summary.skipped,
            summary.error_count
        );
        summary
    }

    /// Fire-and-forget: the match is already committed, so a scheduling
    /// failure is only logged.
    async fn request_enrichment(&self, player: &Player) {
        if !player.needs_enrichment() {
            return;
        }
        if let Err(e) = self.gate.schedule(&player.name).await {
            error!("Could not schedule enrichment for {}: {}", player.name, e);
        }
    }
}
