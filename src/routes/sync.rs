//! Manual reload and poller control.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::Controller;

// ---

pub fn router<C: Controller>() -> Router<AppState<C>> {
    // ---
    Router::new()
        .route("/sync/load", post(load::<C>))
        .route("/sync/status", get(status::<C>))
        .route("/poller/interval", put(set_interval::<C>))
}

/// Handle `POST /sync/load`: start a history reload in the background.
async fn load<C: Controller>(State(service): State<AppState<C>>) -> impl IntoResponse {
    // ---
    let previous = service.last_load().await;
    match service.begin_load() {
        Some(_) => {
            tracing::info!("POST /sync/load - reload started");
            (
                StatusCode::ACCEPTED,
                Json(json!({"state": "started", "previous": previous})),
            )
                .into_response()
        }
        None => (
            StatusCode::CONFLICT,
            Json(json!({"error": "a load is already running"})),
        )
            .into_response(),
    }
}

async fn status<C: Controller>(State(service): State<AppState<C>>) -> impl IntoResponse {
    // ---
    let polling = service.is_polling().await;
    let period = service.poll_period().await;
    let last_load = service.last_load().await;

    Json(json!({
        "loading": service.is_loading(),
        "polling": polling,
        "poll_period_secs": period.as_secs(),
        "last_load": last_load,
    }))
}

#[derive(Debug, Deserialize)]
struct IntervalRequest {
    seconds: i64,
}

/// Handle `PUT /poller/interval`.
async fn set_interval<C: Controller>(
    State(service): State<AppState<C>>,
    Json(req): Json<IntervalRequest>,
) -> impl IntoResponse {
    // ---
    match service.set_read_interval(req.seconds).await {
        Ok(period) => (StatusCode::OK, Json(json!({"seconds": period.as_secs()}))).into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}
