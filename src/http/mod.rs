//! HTTP Surface (spec.md §4.7, §6). A thin `axum` adapter grounded on
//! `fspulse/src/web/server.rs`'s `WebServer`: build a `Router`, bind a
//! `TcpListener`, serve. Request parsing, CORS, and JSON envelope
//! formatting live entirely here — the engine modules know nothing about
//! HTTP.

pub mod cors;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

pub use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/api/scan_obj/{uid}",
            get(routes::list_scan_objs).post(routes::create_scan_obj),
        )
        .route("/api/scan_obj/{uid}/{id}", axum::routing::delete(routes::delete_scan_obj))
        .route("/api/filedb/{uid}/{search_text}", get(routes::search_filedb))
        .route("/api/audit/events", post(routes::audit_event))
        .layer(axum::middleware::from_fn(cors::apply))
        .with_state(state)
}

/// Binds and serves the HTTP surface until the process is terminated.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    log::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await
}
