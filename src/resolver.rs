//! Player identity resolver.
//!
//! Walks a known player from `Unresolved` (no external id) through `Resolved`
//! (external id, no detail) to `Enriched` (both). Detail is written once.

use std::sync::Arc;

use tracing::{debug, info};

use crate::directory::{PlayerCandidate, PlayerDirectory};
use crate::error::ResolveError;
use crate::model::{EnrichmentState, Player};
use crate::store::IdentityStore;

/// Split a source display name like `"Herbert P.H."` into its last-name part
/// (`"Herbert"`) and trailing initials token (`"P.H."`).
///
/// A single-token name is all last name, with no initials.
pub fn split_raw_name(raw_name: &str) -> (String, Option<String>) {
    let parts: Vec<&str> = raw_name.split_whitespace().collect();
    match parts.as_slice() {
        [] => (String::new(), None),
        [only] => (only.to_string(), None),
        [rest @ .., last] => (rest.join(" "), Some(last.to_string())),
    }
}

/// Initials of a first name: `"Pierre-Hugues"` -> `"P.H."`.
pub fn first_name_initials(first_name: &str) -> String {
    first_name
        .split(|c: char| c == ' ' || c == '-')
        .filter_map(|part| part.chars().next())
        .flat_map(|c| c.to_uppercase())
        .map(|c| format!("{c}."))
        .collect()
}

/// Pick the candidate whose identity matches the raw name.
///
/// `candidates` must already be restricted to the right last name.
pub fn choose_candidate<'a>(
    candidates: &'a [PlayerCandidate],
    initials: Option<&str>,
) -> Option<&'a PlayerCandidate> {
    match candidates {
        [] => None,
        [only] => Some(only),
        many => {
            let initials = initials?;
            many.iter().find(|c| {
                !c.first_name.is_empty() && first_name_initials(&c.first_name) == initials
            })
        }
    }
}

pub struct PlayerResolver {
    store: Arc<dyn IdentityStore>,
    directory: Arc<dyn PlayerDirectory>,
}

impl PlayerResolver {
    pub fn new(store: Arc<dyn IdentityStore>, directory: Arc<dyn PlayerDirectory>) -> Self {
        Self { store, directory }
    }

    /// Resolve and enrich the player stored under `raw_name`.
    ///
    /// Returns `Ok(None)` when no such player exists yet, and the player
    /// unchanged when it is already enriched.
    pub async fn fill_player_details(
        &self,
        raw_name: &str,
    ) -> Result<Option<Player>, ResolveError> {
        let Some(player) = self.store.find_player_by_name(raw_name).await? else {
            debug!("No stored player named '{}', nothing to enrich", raw_name);
            return Ok(None);
        };

        if player.enrichment_state() == EnrichmentState::Enriched {
            return Ok(Some(player));
        }

        let (last_name, initials) = split_raw_name(raw_name);
        let candidates: Vec<PlayerCandidate> = self
            .directory
            .search(&last_name)
            .await?
            .into_iter()
            .filter(|c| c.last_name.to_lowercase() == last_name.to_lowercase())
            .collect();

        let player = match player.external_id.clone() {
            None => {
                let chosen = choose_candidate(&candidates, initials.as_deref())
                    .ok_or_else(|| ResolveError::PlayerNotFound(raw_name.to_string()))?;
                info!(
                    "Resolved '{}' to {} ({} {}) among {} candidates",
                    raw_name,
                    chosen.external_id,
                    chosen.first_name,
                    chosen.last_name,
                    candidates.len()
                );
                self.store
                    .add_external_identity(player.id, &chosen.external_id)
                    .await?
            }
            Some(external_id) => {
                // A stored id that the directory no longer lists is stale
                if !candidates.iter().any(|c| c.external_id == external_id) {
                    return Err(ResolveError::PlayerNotFound(raw_name.to_string()));
                }
                player
            }
        };

        let Some(external_id) = player.external_id.clone() else {
            return Err(ResolveError::PlayerNotFound(raw_name.to_string()));
        };

        if player.caracteristics.is_some() {
            return Ok(Some(player));
        }

        let profile = self.directory.details(&external_id).await?;
        let caracteristics = self.store.add_caracteristics(player.id, &profile).await?;
        info!("Stored caracteristics for '{}' ({})", raw_name, external_id);

        Ok(Some(Player {
            caracteristics: Some(caracteristics),
            ..player
        }))
    }
}
