//! Identity store: transactional persistence for players, matches and odds.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{Caracteristics, Match, NewMatch, Player, PlayerProfile};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Exact, case-sensitive lookup on the display name. The oldest row wins
    /// when several players share a name.
    async fn find_player_by_name(&self, name: &str) -> Result<Option<Player>, StoreError>;

    async fn find_player(&self, id: i64) -> Result<Option<Player>, StoreError>;

    /// Insert a match and its odds in one transaction, reusing existing
    /// players by name and creating the missing ones.
    ///
    /// Fails with [`StoreError::DuplicateMatch`] when (date, winner, loser)
    /// already exists; nothing is written in that case.
    async fn insert_match(&self, new_match: &NewMatch) -> Result<Match, StoreError>;

    /// Attach biographical detail to a player that has none yet.
    async fn add_caracteristics(
        &self,
        player_id: i64,
        profile: &PlayerProfile,
    ) -> Result<Caracteristics, StoreError>;

    /// Set the external id once. Repeating the same id is a no-op.
    async fn add_external_identity(
        &self,
        player_id: i64,
        external_id: &str,
    ) -> Result<Player, StoreError>;

    async fn count_matches(&self) -> Result<i64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
