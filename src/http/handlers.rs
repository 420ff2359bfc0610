use super::state::AppState;
use crate::session::SessionState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub status: String,
    pub message: String,
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub transcript: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
/// Start listening
pub async fn start_session(State(state): State<AppState>) -> impl IntoResponse {
    // Reject out-of-state commands up front so callers get a conflict, not
    // an internal error.
    let current = state.controller.state().await;
    if !matches!(current, SessionState::Idle) {
        return (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("cannot start listening while {}", current),
            }),
        )
            .into_response();
    }

    match state.controller.start_listening().await {
        Ok(()) => {
            info!("session started over HTTP");
            (
                StatusCode::OK,
                Json(ActionResponse {
                    status: "listening".to_string(),
                    message: "Session started".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("failed to start session: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// POST /session/stop
/// Stop listening and persist the transcript
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.stop_and_save().await {
        Ok(Some(path)) => {
            info!("session stopped over HTTP, saved to {}", path.display());
            (
                StatusCode::OK,
                Json(StopResponse {
                    status: "saved".to_string(),
                    message: "Transcript saved".to_string(),
                    path: Some(path.display().to_string()),
                }),
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "no active session to stop".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("failed to stop session: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// POST /session/retry
/// Clear an error state
pub async fn retry_session(State(state): State<AppState>) -> impl IntoResponse {
    if state.controller.retry().await {
        (
            StatusCode::OK,
            Json(ActionResponse {
                status: "idle".to_string(),
                message: "Error cleared".to_string(),
            }),
        )
            .into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "not in an error state".to_string(),
            }),
        )
            .into_response()
    }
}

/// GET /session
/// State snapshot and stats
pub async fn get_session(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.controller.stats().await;
    (StatusCode::OK, Json(stats)).into_response()
}

/// GET /session/transcript
/// Current visible transcript
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript = state.controller.transcript().await;
    (
        StatusCode::OK,
        Json(TranscriptResponse { transcript }),
    )
        .into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
