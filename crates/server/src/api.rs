use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use buybuddy_agent::{AgentRuntime, Session, SessionId};
use buybuddy_core::domain::result::OrchestratorResult;
use buybuddy_core::errors::ApplicationError;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error_class: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    pub message: &'static str,
    pub correlation_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    #[serde(flatten)]
    pub session: Session,
    pub phase: u8,
}

impl SessionView {
    fn new(session_id: &SessionId, session: Session) -> Self {
        let phase = session.state.phase();
        Self { session_id: session_id.to_string(), session, phase }
    }
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/api/v1/sessions/{session_id}/turns", post(submit_turn))
        .route("/api/v1/sessions/{session_id}", get(session_snapshot).delete(delete_session))
        .route("/api/v1/sessions/{session_id}/reset", post(reset_session))
        .with_state(ApiState { runtime })
}

/// Always answers 200 with a well-formed result; undecodable packets become
/// error results rather than transport errors.
async fn submit_turn(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: String,
) -> Json<OrchestratorResult> {
    let session_id = SessionId::from(session_id);
    let correlation_id = correlation_id(&headers);
    info!(
        event_name = "api.turn.received",
        session_id = %session_id,
        correlation_id = %correlation_id,
        bytes = body.len(),
        "turn received"
    );

    Json(state.runtime.handle_raw_turn(&session_id, &body, &correlation_id).await)
}

async fn session_snapshot(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<SessionView>, (StatusCode, Json<ApiError>)> {
    let session_id = SessionId::from(session_id);
    let correlation_id = correlation_id(&headers);

    state
        .runtime
        .snapshot(&session_id)
        .await
        .map(|session| Json(SessionView::new(&session_id, session)))
        .map_err(|error| api_error(error, &session_id, correlation_id))
}

async fn delete_session(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let session_id = SessionId::from(session_id);
    let correlation_id = correlation_id(&headers);

    state
        .runtime
        .remove(&session_id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|error| api_error(error, &session_id, correlation_id))
}

async fn reset_session(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
) -> Json<SessionView> {
    let session_id = SessionId::from(session_id);
    let session = state.runtime.reset(&session_id).await;
    Json(SessionView::new(&session_id, session))
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn api_error(
    error: ApplicationError,
    session_id: &SessionId,
    correlation_id: String,
) -> (StatusCode, Json<ApiError>) {
    let interface = error.into_interface(correlation_id);
    let status = match interface.error_class() {
        "bad_request" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "conflict" => StatusCode::CONFLICT,
        "service_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(
        event_name = "api.request.failed",
        session_id = %session_id,
        correlation_id = interface.correlation_id(),
        error_class = interface.error_class(),
        error = %interface,
        "request failed"
    );

    (
        status,
        Json(ApiError {
            error_class: interface.error_class(),
            reason_code: interface.reason_code().map(str::to_string),
            message: interface.user_message(),
            correlation_id: interface.correlation_id().to_string(),
        }),
    )
}
