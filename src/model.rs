//! Domain records for players, matches and bookmaker odds.
//!
//! `New*` types are unpersisted shapes produced by the normalizer; the plain
//! types carry the surrogate ids assigned by the identity store.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Persisted player row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub id: i64,
    /// Display name as it appears in source data. Not unique.
    pub name: String,
    /// Identifier in the third-party player database, once resolved.
    pub external_id: Option<String>,
    pub caracteristics: Option<Caracteristics>,
}

impl Player {
    /// A player needs enrichment until both the external id and the detail are known.
    pub fn needs_enrichment(&self) -> bool {
        self.external_id.is_none() || self.caracteristics.is_none()
    }

    pub fn enrichment_state(&self) -> EnrichmentState {
        match (&self.external_id, &self.caracteristics) {
            (None, _) => EnrichmentState::Unresolved,
            (Some(_), None) => EnrichmentState::Resolved,
            (Some(_), Some(_)) => EnrichmentState::Enriched,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentState {
    Unresolved,
    Resolved,
    Enriched,
}

/// Name-only player stub built from a raw record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPlayer {
    pub name: String,
}

/// Biographical detail, written once by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Caracteristics {
    pub id: i64,
    pub player_id: i64,
    #[serde(flatten)]
    pub detail: PlayerProfile,
}

/// Biographical detail as fetched from the player directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub nationality: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub play_hand: Option<String>,
    pub back_hand: Option<String>,
    pub height_cm: Option<i32>,
    pub weight_kg: Option<i32>,
    pub birth_date: Option<NaiveDate>,
    pub pro_year: Option<i32>,
}

/// Tournament descriptors copied verbatim from the raw record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tournament {
    pub name: Option<String>,
    pub series: Option<String>,
    pub surface: Option<String>,
    pub court: Option<String>,
    pub round: Option<String>,
    pub location: Option<String>,
}

/// Rank and ranking points of one side at match time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RankSnapshot {
    pub rank: Option<i32>,
    pub points: Option<i32>,
}

/// Normalized, unpersisted match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMatch {
    pub date: NaiveDate,
    pub comment: Option<String>,
    pub winner: NewPlayer,
    pub loser: NewPlayer,
    pub winner_snapshot: RankSnapshot,
    pub loser_snapshot: RankSnapshot,
    pub tournament: Tournament,
    pub odds: Vec<NewOdds>,
}

/// Persisted match with its participants and odds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub id: i64,
    pub date: NaiveDate,
    pub comment: Option<String>,
    pub winner: Player,
    pub loser: Player,
    pub winner_snapshot: RankSnapshot,
    pub loser_snapshot: RankSnapshot,
    pub tournament: Tournament,
    pub odds: Vec<Odds>,
}

/// One bookmaker's price pair, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewOdds {
    pub bookmaker: String,
    pub winner: Option<f64>,
    pub loser: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Odds {
    pub id: i64,
    pub match_id: i64,
    pub bookmaker: String,
    pub winner: Option<f64>,
    pub loser: Option<f64>,
}
