//! Shared application state.

use std::sync::Arc;

use axum::extract::State;
use prometheus::Registry;

pub(crate) struct WebState {
    /// Holds the clamd exporter and, on Linux, the process collector.
    pub(crate) registry: Registry,
    pub(crate) metrics_path: String,
}

pub(crate) type SharedState = Arc<WebState>;

pub(crate) type AppState = State<SharedState>;
