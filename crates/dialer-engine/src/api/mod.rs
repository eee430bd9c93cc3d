//! HTTP control surface
//!
//! Thin axum layer over [`DialerEngine`]: run lifecycle operations, run
//! snapshots, the provider webhook sink, and a WebSocket feed of the
//! live event stream. All request and response bodies are JSON.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::error::DialerError;
use crate::orchestrator::types::{LegId, RunId, StartRunRequest};
use crate::orchestrator::DialerEngine;
use crate::telephony::WebhookPayload;

/// Build the full API router
pub fn router(engine: Arc<DialerEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/runs", post(start_run).get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/pause", post(pause_run))
        .route("/runs/{id}/resume", post(resume_run))
        .route("/runs/{id}/stop", post(stop_run))
        .route("/runs/{id}/legs/{leg_id}/hangup", post(hangup_leg))
        .route("/webhooks/telephony", post(telephony_webhook))
        .route("/events", get(event_stream))
        .with_state(engine)
}

/// Engine error carried out of a handler
pub struct ApiError(DialerError);

impl From<DialerError> for ApiError {
    fn from(e: DialerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DialerError::NotFound(_) => StatusCode::NOT_FOUND,
            DialerError::InvalidInput(_) | DialerError::Configuration(_) => {
                StatusCode::BAD_REQUEST
            }
            DialerError::Run(_) | DialerError::Leg(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct StartRunResponse {
    run_id: RunId,
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn start_run(
    State(engine): State<Arc<DialerEngine>>,
    Json(request): Json<StartRunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = engine.start_run(request).await?;
    Ok((StatusCode::CREATED, Json(StartRunResponse { run_id })))
}

async fn list_runs(State(engine): State<Arc<DialerEngine>>) -> impl IntoResponse {
    Json(engine.active_runs().await)
}

async fn get_run(
    State(engine): State<Arc<DialerEngine>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(engine.snapshot(&RunId(id)).await?))
}

async fn pause_run(
    State(engine): State<Arc<DialerEngine>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = RunId(id);
    engine.pause_run(&run_id).await?;
    Ok(Json(engine.snapshot(&run_id).await?))
}

async fn resume_run(
    State(engine): State<Arc<DialerEngine>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = RunId(id);
    engine.resume_run(&run_id).await?;
    Ok(Json(engine.snapshot(&run_id).await?))
}

async fn stop_run(
    State(engine): State<Arc<DialerEngine>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = RunId(id);
    engine.stop_run(&run_id).await?;
    Ok(Json(engine.snapshot(&run_id).await?))
}

async fn hangup_leg(
    State(engine): State<Arc<DialerEngine>>,
    Path((id, leg_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    engine.hangup_leg(&RunId(id), &LegId(leg_id)).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn telephony_webhook(
    State(engine): State<Arc<DialerEngine>>,
    Json(payload): Json<WebhookPayload>,
) -> Result<impl IntoResponse, ApiError> {
    engine.handle_webhook(payload).await?;
    Ok(StatusCode::OK)
}

async fn event_stream(
    State(engine): State<Arc<DialerEngine>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| forward_events(engine, socket))
}

/// Pump broadcast events into one WebSocket until either side closes
async fn forward_events(engine: Arc<DialerEngine>, mut socket: WebSocket) {
    let mut events = engine.subscribe();
    debug!("🔌 Event stream subscriber connected");
    loop {
        match events.recv().await {
            Ok(event) => {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("⚠️ Failed to serialize event: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            // A slow client skips ahead; the next snapshot catches it up.
            Err(RecvError::Lagged(skipped)) => {
                debug!("🐌 Event subscriber lagged, skipped {} events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("🔌 Event stream subscriber disconnected");
}
