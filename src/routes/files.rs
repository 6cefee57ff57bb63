//! Remote log file index and deletion.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;

use super::AppState;
use crate::{Controller, RemoteFile};

// ---

pub fn router<C: Controller>() -> Router<AppState<C>> {
    // ---
    Router::new()
        .route("/files", get(list::<C>))
        .route("/files/{name}", delete(remove::<C>))
}

#[derive(Serialize)]
struct FilesResponse {
    files: Vec<RemoteFile>,
    total_bytes: u64,
}

async fn list<C: Controller>(State(service): State<AppState<C>>) -> Json<FilesResponse> {
    // ---
    let engine = service.engine().lock().await;
    let files = engine.files().to_vec();
    let total_bytes = files.iter().map(|f| f.size_bytes).sum();
    Json(FilesResponse { files, total_bytes })
}

/// Handle `DELETE /files/{name}`. The controller decides; a refusal is a
/// normal answer with `deleted: false`.
async fn remove<C: Controller>(Path(name): Path<String>, State(service): State<AppState<C>>) -> impl IntoResponse {
    // ---
    match service.delete_file(&name).await {
        Ok(deleted) => (StatusCode::OK, Json(json!({"name": name, "deleted": deleted}))).into_response(),
        Err(e) => {
            tracing::error!("Failed to delete {}: {}", name, e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}
