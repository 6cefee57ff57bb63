//! Cached record access and month-range pruning.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::{codec, month_range, Controller};

// ---

pub fn router<C: Controller>() -> Router<AppState<C>> {
    // ---
    Router::new()
        .route("/records", get(records::<C>))
        .route("/cache/prune", post(prune::<C>))
}

/// `[from, to)` filter over cached records.
#[derive(Debug, Deserialize)]
struct RecordsQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

/// Handle `GET /records`: records in wire format, oldest first.
async fn records<C: Controller>(
    Query(params): Query<RecordsQuery>,
    State(service): State<AppState<C>>,
) -> impl IntoResponse {
    // ---
    let engine = service.engine().lock().await;
    let picked = engine.cache().range_filter(|r| {
        params.from.map_or(true, |from| r.timestamp >= from) && params.to.map_or(true, |to| r.timestamp < to)
    });

    let raw: Vec<_> = picked
        .iter()
        .take(params.limit.unwrap_or(1000))
        .map(codec::serialize)
        .collect();

    tracing::debug!("GET /records - returning {} of {} matches", raw.len(), picked.len());
    Json(raw)
}

#[derive(Debug, Deserialize)]
struct PruneRequest {
    year_from: i32,
    month_from: u32,
    year_to: i32,
    month_to: u32,
    /// Without confirmation only the match count is reported.
    #[serde(default)]
    confirm: bool,
}

/// Handle `POST /cache/prune`.
async fn prune<C: Controller>(State(service): State<AppState<C>>, Json(req): Json<PruneRequest>) -> impl IntoResponse {
    // ---
    let Some((from, to)) = month_range(req.year_from, req.month_from, req.year_to, req.month_to) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": "invalid month range"})),
        )
            .into_response();
    };

    let pruned = service.engine().lock().await.prune_range(from, to, req.confirm);
    let flushed = match pruned {
        Ok((summary, Some(pending))) => pending.write().await.map(|_| summary),
        Ok((summary, None)) => Ok(summary),
        Err(e) => Err(e),
    };

    match flushed {
        Ok(summary) => {
            tracing::info!(
                matched = summary.matched,
                removed = summary.removed,
                confirmed = summary.confirmed,
                "POST /cache/prune"
            );
            (StatusCode::OK, Json(json!(summary))).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to prune cache: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to persist pruned cache"})),
            )
                .into_response()
        }
    }
}
