//! Postgres identity store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};

use super::IdentityStore;
use crate::error::StoreError;
use crate::model::{Caracteristics, Match, NewMatch, NewPlayer, Odds, Player, PlayerProfile};

/// Name of the unique constraint guarding the (date, winner, loser) natural key.
pub const MATCH_NATURAL_KEY: &str = "uq_matches_date_winner_loser";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS players (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        external_id TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_players_name ON players (name)",
    r#"
    CREATE TABLE IF NOT EXISTS player_detail (
        id BIGSERIAL PRIMARY KEY,
        player_id BIGINT NOT NULL UNIQUE REFERENCES players (id) ON DELETE CASCADE,
        nationality TEXT,
        first_name TEXT,
        last_name TEXT,
        play_hand TEXT,
        back_hand TEXT,
        height_cm INTEGER,
        weight_kg INTEGER,
        birth_date DATE,
        pro_year INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS matches (
        id BIGSERIAL PRIMARY KEY,
        date DATE NOT NULL,
        comment TEXT,
        winner_id BIGINT NOT NULL REFERENCES players (id) ON DELETE CASCADE,
        loser_id BIGINT NOT NULL REFERENCES players (id) ON DELETE CASCADE,
        winner_rank INTEGER,
        winner_points INTEGER,
        loser_rank INTEGER,
        loser_points INTEGER,
        tournament_name TEXT,
        tournament_series TEXT,
        tournament_surface TEXT,
        tournament_court TEXT,
        tournament_round TEXT,
        tournament_location TEXT,
        CONSTRAINT uq_matches_date_winner_loser UNIQUE (date, winner_id, loser_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS match_odds (
        id BIGSERIAL PRIMARY KEY,
        match_id BIGINT NOT NULL REFERENCES matches (id) ON DELETE CASCADE,
        bookmaker TEXT NOT NULL,
        winner DOUBLE PRECISION,
        loser DOUBLE PRECISION,
        CONSTRAINT uq_match_odds_match_bookmaker UNIQUE (match_id, bookmaker)
    )
    "#,
];

type PlayerRow = (i64, String, Option<String>);

type DetailRow = (
    i64,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i32>,
    Option<i32>,
    Option<NaiveDate>,
    Option<i32>,
);

const DETAIL_COLUMNS: &str = "id, player_id, nationality, first_name, last_name, play_hand, \
     back_hand, height_cm, weight_kg, birth_date, pro_year";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn connect_with_retry(url: &str, max_retries: u32) -> Result<Self, StoreError> {
        let mut attempt = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(pool) => {
                    info!("Connected to PostgreSQL");
                    return Ok(Self::new(pool));
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(StoreError::Persistence(format!(
                            "failed to connect to database after {} attempts: {}",
                            max_retries, e
                        )));
                    }
                    warn!("Database connection attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }

    /// Create the tables and constraints if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.db).await?;
        }
        Ok(())
    }
}

fn is_natural_key_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505")
                && db_err.constraint() == Some(MATCH_NATURAL_KEY)
        }
        _ => false,
    }
}

fn detail_from_row(row: DetailRow) -> Caracteristics {
    let (
        id,
        player_id,
        nationality,
        first_name,
        last_name,
        play_hand,
        back_hand,
        height_cm,
        weight_kg,
        birth_date,
        pro_year,
    ) = row;

    Caracteristics {
        id,
        player_id,
        detail: PlayerProfile {
            nationality,
            first_name,
            last_name,
            play_hand,
            back_hand,
            height_cm,
            weight_kg,
            birth_date,
            pro_year,
        },
    }
}

async fn load_detail(
    conn: &mut PgConnection,
    player_id: i64,
) -> Result<Option<Caracteristics>, sqlx::Error> {
    let row: Option<DetailRow> = sqlx::query_as(&format!(
        "SELECT {DETAIL_COLUMNS} FROM player_detail WHERE player_id = $1"
    ))
    .bind(player_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(detail_from_row))
}

async fn player_from_row(conn: &mut PgConnection, row: PlayerRow) -> Result<Player, sqlx::Error> {
    let (id, name, external_id) = row;
    let caracteristics = load_detail(conn, id).await?;
    Ok(Player {
        id,
        name,
        external_id,
        caracteristics,
    })
}

async fn player_by_name(
    conn: &mut PgConnection,
    name: &str,
) -> Result<Option<Player>, sqlx::Error> {
    let row: Option<PlayerRow> = sqlx::query_as(
        "SELECT id, name, external_id FROM players WHERE name = $1 ORDER BY id LIMIT 1",
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(player_from_row(conn, row).await?)),
        None => Ok(None),
    }
}

async fn player_by_id(conn: &mut PgConnection, id: i64) -> Result<Option<Player>, sqlx::Error> {
    let row: Option<PlayerRow> =
        sqlx::query_as("SELECT id, name, external_id FROM players WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    match row {
        Some(row) => Ok(Some(player_from_row(conn, row).await?)),
        None => Ok(None),
    }
}

/// Existing row for the stub's name, or a freshly inserted one.
async fn get_or_create_player(
    conn: &mut PgConnection,
    stub: &NewPlayer,
) -> Result<Player, sqlx::Error> {
    if let Some(player) = player_by_name(conn, &stub.name).await? {
        return Ok(player);
    }

    let (id,): (i64,) = sqlx::query_as("INSERT INTO players (name) VALUES ($1) RETURNING id")
        .bind(&stub.name)
        .fetch_one(&mut *conn)
        .await?;

    Ok(Player {
        id,
        name: stub.name.clone(),
        external_id: None,
        caracteristics: None,
    })
}

/// Hold a transaction-scoped advisory lock per display name, so lookup-or-create
/// of the same name is serialized across transactions. Keys are locked in
/// ascending order, once each.
async fn lock_player_names(conn: &mut PgConnection, names: [&str; 2]) -> Result<(), sqlx::Error> {
    let (a, b): (i32, i32) = sqlx::query_as("SELECT hashtext($1), hashtext($2)")
        .bind(names[0])
        .bind(names[1])
        .fetch_one(&mut *conn)
        .await?;

    let mut keys = vec![a, b];
    keys.sort_unstable();
    keys.dedup();

    for key in keys {
        sqlx::query("SELECT pg_advisory_xact_lock($1::bigint)")
            .bind(key)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn write_match(conn: &mut PgConnection, m: &NewMatch) -> Result<Match, sqlx::Error> {
    lock_player_names(conn, [m.winner.name.as_str(), m.loser.name.as_str()]).await?;

    let winner = get_or_create_player(conn, &m.winner).await?;
    let loser = get_or_create_player(conn, &m.loser).await?;

    let (match_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO matches (
            date, comment, winner_id, loser_id,
            winner_rank, winner_points, loser_rank, loser_points,
            tournament_name, tournament_series, tournament_surface,
            tournament_court, tournament_round, tournament_location
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING id
        "#,
    )
    .bind(m.date)
    .bind(&m.comment)
    .bind(winner.id)
    .bind(loser.id)
    .bind(m.winner_snapshot.rank)
    .bind(m.winner_snapshot.points)
    .bind(m.loser_snapshot.rank)
    .bind(m.loser_snapshot.points)
    .bind(&m.tournament.name)
    .bind(&m.tournament.series)
    .bind(&m.tournament.surface)
    .bind(&m.tournament.court)
    .bind(&m.tournament.round)
    .bind(&m.tournament.location)
    .fetch_one(&mut *conn)
    .await?;

    let mut odds = Vec::with_capacity(m.odds.len());
    for o in &m.odds {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO match_odds (match_id, bookmaker, winner, loser)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(match_id)
        .bind(&o.bookmaker)
        .bind(o.winner)
        .bind(o.loser)
        .fetch_one(&mut *conn)
        .await?;

        odds.push(Odds {
            id,
            match_id,
            bookmaker: o.bookmaker.clone(),
            winner: o.winner,
            loser: o.loser,
        });
    }

    Ok(Match {
        id: match_id,
        date: m.date,
        comment: m.comment.clone(),
        winner,
        loser,
        winner_snapshot: m.winner_snapshot,
        loser_snapshot: m.loser_snapshot,
        tournament: m.tournament.clone(),
        odds,
    })
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn find_player_by_name(&self, name: &str) -> Result<Option<Player>, StoreError> {
        let mut conn = self.db.acquire().await?;
        Ok(player_by_name(&mut *conn, name).await?)
    }

    async fn find_player(&self, id: i64) -> Result<Option<Player>, StoreError> {
        let mut conn = self.db.acquire().await?;
        Ok(player_by_id(&mut *conn, id).await?)
    }

    async fn insert_match(&self, new_match: &NewMatch) -> Result<Match, StoreError> {
        let mut tx = self.db.begin().await?;

        match write_match(&mut *tx, new_match).await {
            Ok(m) => {
                tx.commit().await?;
                Ok(m)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed after insert error: {}", rollback_err);
                }
                if is_natural_key_violation(&e) {
                    Err(StoreError::DuplicateMatch {
                        date: new_match.date,
                        winner: new_match.winner.name.clone(),
                        loser: new_match.loser.name.clone(),
                    })
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn add_caracteristics(
        &self,
        player_id: i64,
        profile: &PlayerProfile,
    ) -> Result<Caracteristics, StoreError> {
        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO player_detail (
                player_id, nationality, first_name, last_name, play_hand,
                back_hand, height_cm, weight_kg, birth_date, pro_year
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (player_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(player_id)
        .bind(&profile.nationality)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.play_hand)
        .bind(&profile.back_hand)
        .bind(profile.height_cm)
        .bind(profile.weight_kg)
        .bind(profile.birth_date)
        .bind(profile.pro_year)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| {
            let missing_player = matches!(
                &e,
                sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23503")
            );
            if missing_player {
                StoreError::PlayerMissing(player_id)
            } else {
                e.into()
            }
        })?;

        match inserted {
            Some((id,)) => Ok(Caracteristics {
                id,
                player_id,
                detail: profile.clone(),
            }),
            None => Err(StoreError::CaracteristicsExist(player_id)),
        }
    }

    async fn add_external_identity(
        &self,
        player_id: i64,
        external_id: &str,
    ) -> Result<Player, StoreError> {
        let mut tx = self.db.begin().await?;

        let current: Option<(Option<String>,)> =
            sqlx::query_as("SELECT external_id FROM players WHERE id = $1 FOR UPDATE")
                .bind(player_id)
                .fetch_optional(&mut *tx)
                .await?;

        match current {
            None => return Err(StoreError::PlayerMissing(player_id)),
            Some((Some(existing),)) if existing != external_id => {
                return Err(StoreError::Persistence(format!(
                    "player {} already resolved to {}, refusing {}",
                    player_id, existing, external_id
                )));
            }
            Some((Some(_),)) => {}
            Some((None,)) => {
                sqlx::query("UPDATE players SET external_id = $1 WHERE id = $2")
                    .bind(external_id)
                    .bind(player_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let player = player_by_id(&mut *tx, player_id)
            .await?
            .ok_or(StoreError::PlayerMissing(player_id))?;
        tx.commit().await?;

        Ok(player)
    }

    async fn count_matches(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM matches")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}
