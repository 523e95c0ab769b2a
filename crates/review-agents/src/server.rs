//! HTTP boundary.
//!
//! | Method | Path                   | Response                               |
//! |--------|------------------------|----------------------------------------|
//! | POST   | `/api/analyze`         | `AnalysisResponse` JSON                |
//! | POST   | `/api/analyze/stream`  | SSE: `message` events, then `done`     |
//! | POST   | `/api/reshuffle`       | `StructureSuggestion` JSON             |
//! | POST   | `/api/emotional-arc`   | `EmotionalArc` JSON                    |
//! | GET    | `/health`              | status, persona count, timestamp       |
//!
//! Only input problems become error responses (400, `{"error": ...}`).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use evaluation::{parse_request, EvaluationInput, InputError, PersonaSet, RuntimeOptions};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::backend::BackendRegistry;
use crate::orchestrator::EvaluationOrchestrator;
use crate::prompts::PROMPT_VERSION;

type Prepared = (EvaluationInput, RuntimeOptions, EvaluationOrchestrator);

/// Shared, read-only request context.
#[derive(Debug)]
pub struct AppState {
    pub personas: PersonaSet,
    pub defaults: RuntimeOptions,
    pub registry: &'static BackendRegistry,
}

impl AppState {
    fn prepare(&self, body: &[u8]) -> Result<Prepared, ApiError> {
        let body: Value = serde_json::from_slice(body)?;
        let (input, opts) = parse_request(&body, &self.defaults)?;
        let orchestrator = EvaluationOrchestrator::for_request(self.registry, &opts);
        Ok((input, opts, orchestrator))
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request body is not valid JSON: {0}")]
    Body(#[from] serde_json::Error),

    #[error(transparent)]
    Input(#[from] InputError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self, "rejecting request");
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/analyze", post(handle_analyze))
        .route("/api/analyze/stream", post(handle_analyze_stream))
        .route("/api/reshuffle", post(handle_reshuffle))
        .route("/api/emotional-arc", post(handle_emotional_arc))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Serve until Ctrl+C.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "review service listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("review service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        return;
    }
    info!("Ctrl+C received, shutting down");
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "personas": state.personas.len(),
        "prompt_version": PROMPT_VERSION,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn handle_analyze(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (input, opts, orchestrator) = state.prepare(&body)?;
    let response = orchestrator
        .evaluate_blocking(input, state.personas.as_slice(), &opts)
        .await?;
    Ok(Json(response).into_response())
}

async fn handle_analyze_stream(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (input, opts, orchestrator) = state.prepare(&body)?;
    let stream =
        orchestrator.evaluate_streaming(input, state.personas.as_slice().to_vec(), opts)?;

    let events = stream.into_stream().filter_map(|event| async move {
        match event.data() {
            Ok(data) => Some(Ok(Event::default().event(event.event_name()).data(data))),
            Err(e) => {
                warn!(error = %e, "dropping unserializable stream event");
                None
            }
        }
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn handle_reshuffle(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (input, opts, orchestrator) = state.prepare(&body)?;
    let suggestion = orchestrator.reshuffle(&input, &opts).await?;
    Ok(Json(suggestion).into_response())
}

async fn handle_emotional_arc(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (input, opts, orchestrator) = state.prepare(&body)?;
    let arc = orchestrator.emotional_arc(&input, &opts).await?;
    Ok(Json(arc).into_response())
}
