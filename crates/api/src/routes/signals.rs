use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::info;

use common::time::now_ts;
use common::{Error, ExternalUpdate, IncomingSignal, Signal, SignalRef};
use engine::{IngestOutcome, UpdateOutcome};

use crate::{auth::require_auth, ApiError, AppState};

pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/signals", get(list_open).post(post_signal))
        .route("/api/signals/:id", get(get_signal))
        .route("/api/signals/:id/update", post(post_update))
        .route(
            "/api/messages/:chat_id/:message_id/update",
            post(post_message_update),
        )
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

// ─── Listing ──────────────────────────────────────────────────────────────────

async fn list_open(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let signals = state.tracker.open_signals(now_ts()).await?;
    Ok(Json(json!({
        "total_open": signals.len(),
        "signals": signals,
    })))
}

async fn get_signal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Signal>, ApiError> {
    let signal = state
        .tracker
        .store()
        .get(id)
        .await?
        .ok_or(Error::NotFound(id))?;
    Ok(Json(signal))
}

// ─── Intake ───────────────────────────────────────────────────────────────────

async fn post_signal(
    State(state): State<AppState>,
    Json(incoming): Json<IncomingSignal>,
) -> Result<(StatusCode, Json<IngestOutcome>), ApiError> {
    info!(
        chat = incoming.source_chat,
        message = incoming.source_message,
        "POST /api/signals"
    );
    let outcome = state.tracker.ingest(incoming, now_ts()).await?;
    let status = match outcome {
        IngestOutcome::Created(_) => StatusCode::CREATED,
        IngestOutcome::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        IngestOutcome::NotASignal | IngestOutcome::Duplicate(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

// ─── Manual updates ───────────────────────────────────────────────────────────

async fn post_update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<ExternalUpdate>,
) -> Result<Json<Value>, ApiError> {
    let outcome: UpdateOutcome = state.tracker.apply_external(id, update, now_ts()).await?;
    Ok(Json(json!({ "signal_id": id, "outcome": outcome })))
}

/// Same as a signal update, addressed by the source post or a relayed card.
async fn post_message_update(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(i64, i64)>,
    Json(update): Json<ExternalUpdate>,
) -> Result<Json<Value>, ApiError> {
    let target = SignalRef::Message {
        chat_id,
        message_id,
    };
    let id = state.tracker.resolve(target).await?;
    let outcome = state.tracker.apply_external(id, update, now_ts()).await?;
    Ok(Json(json!({ "signal_id": id, "outcome": outcome })))
}
