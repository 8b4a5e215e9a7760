//! Player directory: search-by-name and biographical detail lookups against
//! the ATP Tour site, optionally tunneled through a FlareSolverr proxy.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::DirectoryError;
use crate::model::PlayerProfile;

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerCandidate {
    pub external_id: String,
    pub first_name: String,
    pub last_name: String,
    pub country: Option<String>,
    pub active: bool,
}

#[async_trait]
pub trait PlayerDirectory: Send + Sync {
    /// Candidates for a last name. Not filtered: callers match names themselves.
    async fn search(&self, last_name: &str) -> Result<Vec<PlayerCandidate>, DirectoryError>;

    async fn details(&self, external_id: &str) -> Result<PlayerProfile, DirectoryError>;
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "PascalCase")]
struct SearchResponse {
    players: Option<Vec<SearchPlayer>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "PascalCase")]
struct SearchPlayer {
    player_id: String,
    first_name: String,
    last_name: String,
    natl_id: Option<String>,
    active: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "PascalCase")]
struct HeroResponse {
    first_name: Option<String>,
    last_name: Option<String>,
    nationality: Option<String>,
    birth_date: Option<String>,
    pro_year: Option<i32>,
    height_cm: Option<i32>,
    weight_kg: Option<i32>,
    play_hand: Option<Handedness>,
    back_hand: Option<Handedness>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "PascalCase")]
struct Handedness {
    id: Option<Value>,
}

impl Handedness {
    fn label(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<SearchPlayer> for PlayerCandidate {
    fn from(p: SearchPlayer) -> Self {
        Self {
            external_id: p.player_id,
            first_name: p.first_name,
            last_name: p.last_name,
            country: p.natl_id,
            active: p.active.as_deref() == Some("A"),
        }
    }
}

impl From<HeroResponse> for PlayerProfile {
    fn from(h: HeroResponse) -> Self {
        Self {
            nationality: h.nationality,
            first_name: h.first_name,
            last_name: h.last_name,
            play_hand: h.play_hand.as_ref().and_then(Handedness::label),
            back_hand: h.back_hand.as_ref().and_then(Handedness::label),
            height_cm: h.height_cm.filter(|v| *v > 0),
            weight_kg: h.weight_kg.filter(|v| *v > 0),
            birth_date: h.birth_date.as_deref().and_then(parse_birth_date),
            pro_year: h.pro_year.filter(|v| *v > 0),
        }
    }
}

fn parse_birth_date(s: &str) -> Option<NaiveDate> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .map(|dt| dt.date())
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

/// Pull the JSON document out of the `<pre>` block a browser renders for a
/// JSON response.
fn extract_pre_json(page: &str) -> Result<Value, DirectoryError> {
    let start = page
        .find("<pre")
        .and_then(|i| page[i..].find('>').map(|j| i + j + 1))
        .ok_or_else(|| DirectoryError::Malformed("no <pre> tag found in the response".into()))?;
    let end = page[start..]
        .find("</pre>")
        .map(|j| start + j)
        .ok_or_else(|| DirectoryError::Malformed("unterminated <pre> tag".into()))?;

    serde_json::from_str(page[start..end].trim())
        .map_err(|e| DirectoryError::Malformed(format!("invalid JSON in <pre>: {}", e)))
}

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// ATP Tour site client.
pub struct AtpDirectory {
    base_url: String,
    flaresolverr: Option<String>,
    http_client: reqwest::Client,
    rate_limiter: DirectLimiter,
}

impl AtpDirectory {
    pub fn new(
        base_url: &str,
        flaresolverr: Option<String>,
        requests_per_minute: u32,
    ) -> Result<Self, DirectoryError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3",
            )
            .build()
            .map_err(|e| DirectoryError::Malformed(format!("failed to build HTTP client: {}", e)))?;

        let quota = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            flaresolverr,
            http_client,
            rate_limiter: RateLimiter::direct(Quota::per_minute(quota)),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, DirectoryError> {
        self.rate_limiter.until_ready().await;

        match &self.flaresolverr {
            Some(proxy) => self.get_via_flaresolverr(proxy, url).await,
            None => self.get_direct(url).await,
        }
    }

    async fn get_direct(&self, url: &str) -> Result<Value, DirectoryError> {
        let response = self.http_client.get(url).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(DirectoryError::Transient(format!("status {}: {}", status, body)));
            }
            return Err(DirectoryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| DirectoryError::Malformed(e.to_string()))
    }

    async fn get_via_flaresolverr(&self, proxy: &str, url: &str) -> Result<Value, DirectoryError> {
        let endpoint = format!("{}v1", proxy);
        let response = self
            .http_client
            .post(&endpoint)
            .json(&json!({
                "cmd": "request.get",
                "url": url,
                "maxTimeout": 60000
            }))
            .send()
            .await?
            .error_for_status()?;

        let payload: Value = response.json().await?;
        let page = payload
            .pointer("/solution/response")
            .and_then(Value::as_str)
            .unwrap_or_default();

        extract_pre_json(page)
    }
}

#[async_trait]
impl PlayerDirectory for AtpDirectory {
    async fn search(&self, last_name: &str) -> Result<Vec<PlayerCandidate>, DirectoryError> {
        let url = format!(
            "{}/en/-/www/site-search/{}/",
            self.base_url,
            last_name.to_lowercase()
        );

        let data = self.get_json(&url).await?;
        let parsed: SearchResponse =
            serde_json::from_value(data).map_err(|e| DirectoryError::Malformed(e.to_string()))?;

        let candidates: Vec<PlayerCandidate> = parsed
            .players
            .unwrap_or_default()
            .into_iter()
            .filter(|p| !p.player_id.is_empty())
            .map(PlayerCandidate::from)
            .collect();

        debug!("Directory search '{}' returned {} players", last_name, candidates.len());
        Ok(candidates)
    }

    async fn details(&self, external_id: &str) -> Result<PlayerProfile, DirectoryError> {
        let url = format!("{}/en/-/www/players/hero/{}/", self.base_url, external_id);

        let data = self.get_json(&url).await?;
        let hero: HeroResponse =
            serde_json::from_value(data).map_err(|e| DirectoryError::Malformed(e.to_string()))?;

        info!("Fetched personal details for {}", external_id);
        Ok(hero.into())
    }
}
