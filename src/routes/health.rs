//! API health check endpoint.
//!
//! `/health` answers as long as the process serves HTTP; the controller link
//! is reported as a flag rather than as a failure status, because the
//! service keeps serving cached data while the controller is unreachable.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::Controller;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    controller_connected: bool,
    loading: bool,
    polling: bool,
}

/// Handle `GET /health`.
async fn health<C: Controller>(State(service): State<AppState<C>>) -> Json<HealthResponse> {
    // ---
    let controller_connected = service.engine().lock().await.connected();
    Json(HealthResponse {
        status: "ok",
        controller_connected,
        loading: service.is_loading(),
        polling: service.is_polling().await,
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router<C: Controller>() -> Router<AppState<C>> {
    Router::new().route("/health", get(health::<C>))
}
