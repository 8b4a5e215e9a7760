//! In-process identity store with the same constraints as the Postgres schema.
//!
//! Every operation runs under one lock, so a failed insert leaves no trace.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::IdentityStore;
use crate::error::StoreError;
use crate::model::{Caracteristics, Match, NewMatch, Odds, Player, PlayerProfile};

#[derive(Default)]
struct Tables {
    next_id: i64,
    /// Insertion order doubles as id order.
    players: Vec<(i64, String, Option<String>)>,
    details: HashMap<i64, Caracteristics>,
    matches: Vec<Match>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn player(&self, id: i64) -> Option<Player> {
        self.players
            .iter()
            .find(|(pid, _, _)| *pid == id)
            .map(|(id, name, external_id)| Player {
                id: *id,
                name: name.clone(),
                external_id: external_id.clone(),
                caracteristics: self.details.get(id).cloned(),
            })
    }

    fn player_by_name(&self, name: &str) -> Option<Player> {
        let id = self.players.iter().find(|(_, n, _)| n == name)?.0;
        self.player(id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count_players(&self) -> usize {
        self.tables.lock().await.players.len()
    }

    pub async fn count_players_named(&self, name: &str) -> usize {
        let tables = self.tables.lock().await;
        tables.players.iter().filter(|(_, n, _)| n == name).count()
    }

    pub async fn matches(&self) -> Vec<Match> {
        self.tables.lock().await.matches.clone()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_player_by_name(&self, name: &str) -> Result<Option<Player>, StoreError> {
        Ok(self.tables.lock().await.player_by_name(name))
    }

    async fn find_player(&self, id: i64) -> Result<Option<Player>, StoreError> {
        Ok(self.tables.lock().await.player(id))
    }

    async fn insert_match(&self, new_match: &NewMatch) -> Result<Match, StoreError> {
        let mut tables = self.tables.lock().await;

        let winner = tables.player_by_name(&new_match.winner.name);
        let loser = tables.player_by_name(&new_match.loser.name);

        // Both players already known is the only way the natural key can collide
        if let (Some(w), Some(l)) = (&winner, &loser) {
            let taken = tables
                .matches
                .iter()
                .any(|m| m.date == new_match.date && m.winner.id == w.id && m.loser.id == l.id);
            if taken {
                return Err(StoreError::DuplicateMatch {
                    date: new_match.date,
                    winner: new_match.winner.name.clone(),
                    loser: new_match.loser.name.clone(),
                });
            }
        }

        let mut materialize = |existing: Option<Player>, name: &str| match existing {
            Some(p) => p,
            None => {
                let id = tables.next_id();
                tables.players.push((id, name.to_string(), None));
                Player {
                    id,
                    name: name.to_string(),
                    external_id: None,
                    caracteristics: None,
                }
            }
        };
        let winner = materialize(winner, &new_match.winner.name);
        let loser = materialize(loser, &new_match.loser.name);

        let match_id = tables.next_id();
        let odds = new_match
            .odds
            .iter()
            .map(|o| Odds {
                id: tables.next_id(),
                match_id,
                bookmaker: o.bookmaker.clone(),
                winner: o.winner,
                loser: o.loser,
            })
            .collect();

        let stored = Match {
            id: match_id,
            date: new_match.date,
            comment: new_match.comment.clone(),
            winner,
            loser,
            winner_snapshot: new_match.winner_snapshot,
            loser_snapshot: new_match.loser_snapshot,
            tournament: new_match.tournament.clone(),
            odds,
        };
        tables.matches.push(stored.clone());

        Ok(stored)
    }

    async fn add_caracteristics(
        &self,
        player_id: i64,
        profile: &PlayerProfile,
    ) -> Result<Caracteristics, StoreError> {
        let mut tables = self.tables.lock().await;

        if tables.player(player_id).is_none() {
            return Err(StoreError::PlayerMissing(player_id));
        }
        if tables.details.contains_key(&player_id) {
            return Err(StoreError::CaracteristicsExist(player_id));
        }

        let detail = Caracteristics {
            id: tables.next_id(),
            player_id,
            detail: profile.clone(),
        };
        tables.details.insert(player_id, detail.clone());

        Ok(detail)
    }

    async fn add_external_identity(
        &self,
        player_id: i64,
        external_id: &str,
    ) -> Result<Player, StoreError> {
        let mut tables = self.tables.lock().await;

        let row = tables
            .players
            .iter_mut()
            .find(|(id, _, _)| *id == player_id)
            .ok_or(StoreError::PlayerMissing(player_id))?;

        match &row.2 {
            Some(existing) if existing != external_id => {
                return Err(StoreError::Persistence(format!(
                    "player {} already resolved to {}, refusing {}",
                    player_id, existing, external_id
                )));
            }
            Some(_) => {}
            None => row.2 = Some(external_id.to_string()),
        }

        tables
            .player(player_id)
            .ok_or(StoreError::PlayerMissing(player_id))
    }

    async fn count_matches(&self) -> Result<i64, StoreError> {
        Ok(self.tables.lock().await.matches.len() as i64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewOdds, NewPlayer, RankSnapshot, Tournament};
    use chrono::NaiveDate;
    use tokio_test::{assert_err, assert_ok};

    fn new_match(date: (i32, u32, u32), winner: &str, loser: &str) -> NewMatch {
        NewMatch {
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            comment: Some("Completed".into()),
            winner: NewPlayer { name: winner.into() },
            loser: NewPlayer { name: loser.into() },
            winner_snapshot: RankSnapshot::default(),
            loser_snapshot: RankSnapshot::default(),
            tournament: Tournament::default(),
            odds: vec![NewOdds {
                bookmaker: "B365".into(),
                winner: Some(1.5),
                loser: Some(2.6),
            }],
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_ids() {
        let store = MemoryStore::new();
        let m = new_match((2023, 4, 1), "Nadal R.", "Ruud C.");
        let m = assert_ok!(store.insert_match(&m).await);

        assert!(m.id > 0);
        assert_ne!(m.winner.id, m.loser.id);
        assert_eq!(m.odds.len(), 1);
        assert_eq!(m.odds[0].match_id, m.id);
    }

    #[tokio::test]
    async fn test_duplicate_leaves_no_trace() {
        let store = MemoryStore::new();
        let m = new_match((2023, 4, 1), "Nadal R.", "Ruud C.");
        assert_ok!(store.insert_match(&m).await);

        let err = assert_err!(store.insert_match(&m).await);
        assert!(err.is_duplicate());
        assert_eq!(store.count_matches().await.unwrap(), 1);
        assert_eq!(store.count_players().await, 2);
    }

    #[tokio::test]
    async fn test_reversed_pairing_is_a_different_match() {
        let store = MemoryStore::new();
        assert_ok!(store.insert_match(&new_match((2023, 4, 1), "Nadal R.", "Ruud C.")).await);
        assert_ok!(store.insert_match(&new_match((2023, 4, 1), "Ruud C.", "Nadal R.")).await);
        assert_eq!(store.count_matches().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_caracteristics_write_once() {
        let store = MemoryStore::new();
        let m = new_match((2023, 4, 1), "Nadal R.", "Ruud C.");
        let m = assert_ok!(store.insert_match(&m).await);

        let profile = PlayerProfile {
            nationality: Some("Spain".into()),
            ..Default::default()
        };
        assert_ok!(store.add_caracteristics(m.winner.id, &profile).await);
        let err = assert_err!(store.add_caracteristics(m.winner.id, &profile).await);
        assert!(matches!(err, StoreError::CaracteristicsExist(id) if id == m.winner.id));

        assert!(matches!(
            store.add_caracteristics(9999, &profile).await,
            Err(StoreError::PlayerMissing(9999))
        ));
    }

    #[tokio::test]
    async fn test_external_identity_set_once() {
        let store = MemoryStore::new();
        let m = new_match((2023, 4, 1), "Nadal R.", "Ruud C.");
        let m = assert_ok!(store.insert_match(&m).await);

        let p = assert_ok!(store.add_external_identity(m.winner.id, "N409").await);
        assert_eq!(p.external_id.as_deref(), Some("N409"));
        assert_ok!(store.add_external_identity(m.winner.id, "N409").await);
        assert_err!(store.add_external_identity(m.winner.id, "X000").await);
    }
}
