use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::error;

use crate::{auth::require_auth, AppState};

pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/symbols", get(get_symbols))
        .route("/api/sweeps/last", get(get_last_sweep))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

// ─── Symbols ──────────────────────────────────────────────────────────────────

/// Served from the pipeline's cached list, so a long sweep never blocks it.
async fn get_symbols(State(state): State<AppState>) -> Response {
    match state.pipeline.tracked().await {
        Ok(Some(symbols)) => Json(json!({
            "symbols": symbols,
            "count": symbols.len(),
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "sweep in progress" })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to read the registry for the API");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

// ─── Sweeps ───────────────────────────────────────────────────────────────────

async fn get_last_sweep(State(state): State<AppState>) -> Response {
    match state.pipeline.last_report().await {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no sweep has run yet" })),
        )
            .into_response(),
    }
}
