use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let scheduler = if state.pipeline.is_busy() { "running" } else { "idle" };
    Json(json!({
        "status": "ok",
        "scheduler": scheduler,
        "data_source": state.data_source.to_string(),
    }))
}
