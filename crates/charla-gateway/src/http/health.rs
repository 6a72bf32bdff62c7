use std::sync::Arc;

use axum::{extract::State, Json};

use crate::app::AppState;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs(),
        "pending_tasks": state.deps.tracker.pending_count(),
    }))
}
