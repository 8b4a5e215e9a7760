//! Error types shared across the ingestion pipeline.

use thiserror::Error;

/// A raw record that cannot be turned into a match. Raised before any I/O.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' has an invalid value: {value}")]
    InvalidField { field: String, value: String },
    #[error("odds for bookmaker '{0}' are not paired (need both {0}W and {0}L)")]
    UnpairedOdds(String),
    #[error("winner and loser are the same player: {0}")]
    SamePlayer(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The (date, winner, loser) natural key already exists.
    #[error("match already exists: {date} {winner} vs {loser}")]
    DuplicateMatch {
        date: chrono::NaiveDate,
        winner: String,
        loser: String,
    },
    #[error("player {0} already has caracteristics")]
    CaracteristicsExist(i64),
    #[error("player {0} does not exist")]
    PlayerMissing(i64),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::DuplicateMatch { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Persistence(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Connectivity problems, timeouts, rate limiting and 5xx answers.
    #[error("player directory unavailable: {0}")]
    Transient(String),
    #[error("player directory rejected the request (status {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected player directory payload: {0}")]
    Malformed(String),
}

impl DirectoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DirectoryError::Transient(_))
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            return DirectoryError::Transient(e.to_string());
        }
        match e.status() {
            Some(status) if status.is_server_error() || status.as_u16() == 429 => {
                DirectoryError::Transient(e.to_string())
            }
            Some(status) => DirectoryError::Rejected {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => DirectoryError::Malformed(e.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("player {0} not found in the player directory")]
    PlayerNotFound(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    /// Failures worth another attempt at the job layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolveError::Directory(e) if e.is_transient())
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job store error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("job record could not be decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid match record: {0}")]
    Invalid(#[from] NormalizeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestError::Store(e) if e.is_duplicate())
    }
}
