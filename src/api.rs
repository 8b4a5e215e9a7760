//! HTTP surface: thin mapping from requests to the ingestion service.

use axum::{
    extract::{Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::error::IngestError;
use crate::health::HealthState;
use crate::ingest::MatchIngestionService;
use crate::normalize::RawRecord;

#[derive(Clone)]
pub struct AppState {
    pub ingestion: MatchIngestionService,
    pub health: HealthState,
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConflictParams {
    #[serde(default)]
    pub on_conflict_do_nothing: bool,
}

pub fn router(state: AppState) -> Router {
    let ingest_routes = Router::new()
        .route("/match/insert", post(insert_match_handler))
        .route("/match/insert/batch", post(insert_batch_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_handler))
        .merge(ingest_routes)
        .with_state(state)
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.api_key {
        let authorized = request
            .headers()
            .get(AUTHORIZATION)
            .is_some_and(|v| keys_match(v.as_bytes(), expected.as_bytes()));
        if !authorized {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "detail": "Unauthorized - API Key is wrong" })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

/// Constant-time comparison: the running time depends only on the lengths.
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

fn ingest_error_response(e: &IngestError) -> Response {
    match e {
        _ if e.is_duplicate() => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": "Entity already exists in the database" })),
        )
            .into_response(),
        IngestError::Invalid(inner) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": inner.to_string() })),
        )
            .into_response(),
        IngestError::Store(inner) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": inner.to_string() })),
        )
            .into_response(),
    }
}

async fn insert_match_handler(
    State(state): State<AppState>,
    Query(params): Query<ConflictParams>,
    Json(raw): Json<RawRecord>,
) -> Response {
    match state
        .ingestion
        .insert_new_match(&raw, params.on_conflict_do_nothing)
        .await
    {
        Ok(ingested) => {
            state
                .health
                .record_success(usize::from(ingested.match_id().is_some()))
                .await;
            (
                StatusCode::OK,
                Json(json!({ "status": "ok", "match_id": ingested.match_id() })),
            )
                .into_response()
        }
        Err(e) => {
            if matches!(e, IngestError::Store(_)) && !e.is_duplicate() {
                state.health.record_error().await;
            }
            ingest_error_response(&e)
        }
    }
}

async fn insert_batch_handler(
    State(state): State<AppState>,
    Query(params): Query<ConflictParams>,
    Json(raws): Json<Vec<RawRecord>>,
) -> Response {
    let summary = state
        .ingestion
        .insert_batch_matches(&raws, params.on_conflict_do_nothing)
        .await;

    if summary.is_clean() {
        state.health.record_success(summary.inserted.len()).await;
        return (
            StatusCode::OK,
            Json(json!({ "status": "ok", "match_ids": summary.match_ids() })),
        )
            .into_response();
    }

    state.health.record_partial(summary.inserted.len()).await;
    warn!(
        "Batch finished with {} errors out of {} records",
        summary.error_count,
        raws.len()
    );
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "status": "ok",
            "message": format!(
                "{} matches inserted, {} errors",
                summary.inserted.len(),
                summary.error_count
            ),
        })),
    )
        .into_response()
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let last_ingest = *state.health.last_ingest_time.read().await;
    let inserted = *state.health.inserted_total.read().await;
    let errors = state.health.consecutive_errors().await;
    let database_ok = state.ingestion.store().ping().await.is_ok();

    let status = if !database_ok || errors > 5 {
        "degraded"
    } else {
        "ok"
    };

    let http_status = if !database_ok || errors > 10 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        http_status,
        Json(json!({
            "service": "tennis-ingestion",
            "version": env!("CARGO_PKG_VERSION"),
            "status": status,
            "database": database_ok,
            "last_ingest": last_ingest.map(|t| t.to_rfc3339()),
            "inserted_total": inserted,
            "consecutive_errors": errors
        })),
    )
}
