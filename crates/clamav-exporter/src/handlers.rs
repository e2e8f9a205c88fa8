//! HTTP routes: metrics exposition, health and landing page.

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use prometheus::{Encoder, TEXT_FORMAT, TextEncoder};
use tower_http::compression::CompressionLayer;
use tracing::error;

use crate::state::{AppState, SharedState};

pub(crate) fn router(state: SharedState) -> Router {
    let metrics_path = state.metrics_path.clone();
    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route(&metrics_path, get(handle_metrics))
        .with_state(state)
        .layer(CompressionLayer::new())
}

// ============================================================
// Health
// ============================================================

pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

// ============================================================
// Metrics
// ============================================================

/// Runs a collection pass and renders the text exposition format.
///
/// The pass does blocking socket I/O, so it runs off the async runtime.
pub(crate) async fn handle_metrics(State(state): AppState) -> Response {
    let result = tokio::task::spawn_blocking(move || {
        let families = state.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&families, &mut buf).map(|_| buf)
    })
    .await;

    match result {
        Ok(Ok(body)) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "metrics collection panicked in spawn_blocking");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ============================================================
// Landing page
// ============================================================

pub(crate) async fn handle_index(State(state): AppState) -> Html<String> {
    Html(format!(
        "<html>\
         <head><title>ClamAV Exporter</title></head>\
         <body>\
         <h1>ClamAV Exporter</h1>\
         <p>{}</p>\
         <p><a href=\"{}\">Metrics</a></p>\
         </body>\
         </html>",
        clamav_exporter_core::VERSION,
        state.metrics_path
    ))
}
