use super::state::AppState;
use crate::lifecycle::VisibilityEvent;
use crate::model::DaySession;
use crate::session::RejectedRequest;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DayResponse {
    pub day_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopDayResponse {
    pub status: String,
    pub day: DaySession,
}

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub group_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct RetranscribeResponse {
    pub group_id: String,
    pub replaced_segments: usize,
}

#[derive(Debug, Deserialize)]
pub struct MarkUploadedRequest {
    pub segment_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MarkUploadedResponse {
    pub marked: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn bad_request(e: anyhow::Error) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: format!("{:#}", e),
        }),
    )
        .into_response()
}

// ============================================================================
// Day session handlers
// ============================================================================

/// POST /day/start
pub async fn start_day(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.start_day().await {
        Ok(day_id) => {
            info!("Day session started: {}", day_id);
            (
                StatusCode::OK,
                Json(DayResponse {
                    day_id: day_id.clone(),
                    status: "active".to_string(),
                    message: format!("Day session {} started", day_id),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to start day session: {:#}", e);
            bad_request(e)
        }
    }
}

/// POST /day/stop
pub async fn stop_day(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.stop_day().await {
        Ok(day) => {
            info!("Day session stopped: {}", day.id);
            (
                StatusCode::OK,
                Json(StopDayResponse {
                    status: "completed".to_string(),
                    day,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to stop day session: {:#}", e);
            bad_request(e)
        }
    }
}

/// POST /day/groups/start
pub async fn start_group(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.start_group().await {
        Ok(group_id) => (
            StatusCode::OK,
            Json(GroupResponse {
                group_id,
                status: "recording".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to start session group: {:#}", e);
            bad_request(e)
        }
    }
}

/// POST /day/groups/stop
pub async fn stop_group(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.stop_group().await {
        Ok(()) => (
            StatusCode::OK,
            Json(StatusMessage {
                status: "stopped".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to stop session group: {:#}", e);
            bad_request(e)
        }
    }
}

/// POST /day/groups/:group_id/retranscribe
pub async fn retranscribe_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> impl IntoResponse {
    match state.service.retranscribe_group(&group_id).await {
        Ok(replaced_segments) => (
            StatusCode::OK,
            Json(RetranscribeResponse {
                group_id,
                replaced_segments,
            }),
        )
            .into_response(),
        // Caller mistakes (unknown group, group still open, nothing
        // buffered) are 400; 500 is reserved for engine and transport
        // failures.
        Err(e) if e.downcast_ref::<RejectedRequest>().is_some() => bad_request(e),
        Err(e) => {
            error!("Group re-transcription failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("{:#}", e),
                }),
            )
                .into_response()
        }
    }
}

/// GET /day/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.service.stats().await))
}

/// GET /day/transcript
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.service.transcript().await))
}

/// POST /day/segments/uploaded
/// Backend collaborator reports which segments it stored durably
pub async fn mark_uploaded(
    State(state): State<AppState>,
    Json(req): Json<MarkUploadedRequest>,
) -> impl IntoResponse {
    let marked = state.service.mark_uploaded(&req.segment_ids).await;
    (StatusCode::OK, Json(MarkUploadedResponse { marked }))
}

// ============================================================================
// Recovery handlers
// ============================================================================

/// GET /recovery
pub async fn get_recovery(State(state): State<AppState>) -> impl IntoResponse {
    match state.recovery.pending().await {
        Some(summary) => (StatusCode::OK, Json(summary)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "no recoverable day session".to_string(),
            }),
        )
            .into_response(),
    }
}

/// POST /recovery/resume
pub async fn resume_recovery(State(state): State<AppState>) -> impl IntoResponse {
    let session = match state.recovery.resume().await {
        Ok(session) => session,
        Err(e) => return bad_request(e),
    };
    match state.service.resume_day(session).await {
        Ok(day_id) => (
            StatusCode::OK,
            Json(DayResponse {
                day_id: day_id.clone(),
                status: "active".to_string(),
                message: format!("Day session {} resumed", day_id),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to resume day session: {:#}", e);
            bad_request(e)
        }
    }
}

/// POST /recovery/discard
pub async fn discard_recovery(State(state): State<AppState>) -> impl IntoResponse {
    match state.recovery.discard().await {
        Ok(()) => (
            StatusCode::OK,
            Json(StatusMessage {
                status: "discarded".to_string(),
            }),
        )
            .into_response(),
        Err(e) => bad_request(e),
    }
}

/// POST /recovery/fresh
pub async fn fresh_recovery(State(state): State<AppState>) -> impl IntoResponse {
    match state.recovery.start_fresh().await {
        Ok(()) => (
            StatusCode::OK,
            Json(StatusMessage {
                status: "cleared".to_string(),
            }),
        )
            .into_response(),
        Err(e) => bad_request(e),
    }
}

// ============================================================================
// Lifecycle handlers
// ============================================================================

/// POST /lifecycle/hidden
pub async fn lifecycle_hidden(State(state): State<AppState>) -> impl IntoResponse {
    forward_visibility(&state, VisibilityEvent::Hidden).await
}

/// POST /lifecycle/visible
pub async fn lifecycle_visible(State(state): State<AppState>) -> impl IntoResponse {
    forward_visibility(&state, VisibilityEvent::Visible).await
}

async fn forward_visibility(state: &AppState, event: VisibilityEvent) -> axum::response::Response {
    match state.lifecycle.send(event).await {
        Ok(()) => (
            StatusCode::OK,
            Json(StatusMessage {
                status: "accepted".to_string(),
            }),
        )
            .into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "lifecycle monitor is not running".to_string(),
            }),
        )
            .into_response(),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
