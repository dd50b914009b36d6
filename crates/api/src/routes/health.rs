use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use common::time::now_ts;

use crate::{ApiError, AppState};

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
async fn healthz(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let scheduler = state.scheduler.state().await;
    let open = state.tracker.count_open(now_ts()).await?;
    Ok(Json(json!({
        "status": "ok",
        "scheduler": scheduler,
        "open_signals": open,
    })))
}
