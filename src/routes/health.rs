//! Liveness probe.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /health` — liveness probe with version and uptime.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}
