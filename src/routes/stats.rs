//! Derived-state queries: on-time statistics, intervals and live status.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::{Controller, StorageEstimate};

// ---

pub fn router<C: Controller>() -> Router<AppState<C>> {
    // ---
    Router::new()
        .route("/stats", get(stats::<C>))
        .route("/intervals", get(intervals::<C>))
        .route("/live", get(live::<C>))
}

/// Window of a `/stats` query, RFC 3339. Missing bounds default to the
/// cached span.
#[derive(Debug, Deserialize)]
struct StatsQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct StatsResponse {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    on_time_secs: i64,
    total_points: u64,
    event_points: u64,
    storage: Option<StorageEstimate>,
}

async fn stats<C: Controller>(
    Query(params): Query<StatsQuery>,
    State(service): State<AppState<C>>,
) -> impl IntoResponse {
    // ---
    let engine = service.engine().lock().await;
    let now = Utc::now();
    let start = params
        .start
        .or_else(|| engine.cache().oldest_timestamp())
        .unwrap_or(now);
    let end = params
        .end
        .or_else(|| engine.cache().newest_timestamp())
        .unwrap_or(now);

    if end < start {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "end precedes start"})),
        )
            .into_response();
    }

    let counters = engine.counters();
    let body = StatsResponse {
        start,
        end,
        on_time_secs: engine.on_time_within(start, end).num_seconds(),
        total_points: counters.total_points,
        event_points: counters.event_points,
        storage: engine.storage_estimate(),
    };
    tracing::debug!(%start, %end, on_time_secs = body.on_time_secs, "GET /stats");
    (StatusCode::OK, Json(body)).into_response()
}

#[derive(Serialize)]
struct IntervalView {
    from: DateTime<Utc>,
    to: Option<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
    ongoing: bool,
}

#[derive(Serialize)]
struct IntervalsResponse {
    intervals: Vec<IntervalView>,
    /// Start of the interval still running, if the relay is on.
    ongoing_since: Option<DateTime<Utc>>,
    boots: Vec<DateTime<Utc>>,
}

async fn intervals<C: Controller>(State(service): State<AppState<C>>) -> Json<IntervalsResponse> {
    // ---
    let engine = service.engine().lock().await;
    let intervals = engine
        .intervals()
        .iter()
        .map(|i| IntervalView {
            from: i.from,
            to: i.to,
            last_seen: i.last_seen,
            ongoing: i.is_open(),
        })
        .collect();

    Json(IntervalsResponse {
        intervals,
        ongoing_since: engine.ongoing_interval().map(|i| i.from),
        boots: engine.boots().to_vec(),
    })
}

#[derive(Serialize)]
struct LiveResponse {
    connected: bool,
    #[serde(flatten)]
    status: crate::LiveStatus,
}

async fn live<C: Controller>(State(service): State<AppState<C>>) -> Json<LiveResponse> {
    // ---
    let engine = service.engine().lock().await;
    Json(LiveResponse {
        connected: engine.connected(),
        status: engine.live().clone(),
    })
}
