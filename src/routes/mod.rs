//! HTTP API gateway (EMBP).
//!
//! Each sibling module exports a subrouter over the shared service state;
//! this gateway merges them so `main.rs` never sees individual endpoints.

use std::sync::Arc;

use axum::Router;

use crate::{Controller, SyncService};

mod files;
mod health;
mod records;
mod stats;
mod sync;

// ---

/// Shared state of every handler.
pub type AppState<C> = Arc<SyncService<C>>;

pub fn router<C: Controller>(service: AppState<C>) -> Router {
    // ---
    Router::new()
        .merge(health::router())
        .merge(stats::router())
        .merge(records::router())
        .merge(files::router())
        .merge(sync::router())
        .with_state(service)
}
