//! # Swarm API
//!
//! Drives the scheduler: decompose, start, approvals, retries, follow-up
//! questions and the live event stream.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use utoipa::ToSchema;

use super::{label, ApiError, ApiResponse, MissionView, StatusResponse};
use crate::SharedState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct GoalRequest {
    pub goal: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AskResponse {
    pub answer: String,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/decompose", post(decompose))
        .route("/start", post(start))
        .route("/launch", post(launch))
        .route("/status", get(status))
        .route("/agents/:id/block", post(block_agent))
        .route("/agents/:id/unblock", post(unblock_agent))
        .route("/agents/:id/retry", post(retry_agent))
        .route("/synthesize", post(retry_synthesis))
        .route("/cancel", post(cancel))
        .route("/ask", post(ask))
        .route("/events", get(events))
}

/// Decompose a goal into a planned mission (replaces any active mission)
#[utoipa::path(
    post,
    path = "/api/v1/swarm/decompose",
    tag = "swarm",
    request_body = GoalRequest,
    responses(
        (status = 200, description = "Planned mission", body = MissionView),
        (status = 400, description = "Empty goal", body = super::ErrorResponse),
        (status = 502, description = "Decomposer failed", body = super::ErrorResponse)
    )
)]
pub async fn decompose(
    State(state): State<SharedState>,
    Json(req): Json<GoalRequest>,
) -> Result<Json<MissionView>, ApiError> {
    let snapshot = state.scheduler.decompose(&req.goal).await?;
    Ok(Json(snapshot.into()))
}

/// Release the root agents of the planned mission
#[utoipa::path(
    post,
    path = "/api/v1/swarm/start",
    tag = "swarm",
    responses(
        (status = 200, description = "Mission running", body = MissionView),
        (status = 409, description = "Mission is not planned", body = super::ErrorResponse)
    )
)]
pub async fn start(State(state): State<SharedState>) -> Result<Json<MissionView>, ApiError> {
    let snapshot = state.scheduler.start().await?;
    Ok(Json(snapshot.into()))
}

/// Decompose and start in one call
#[utoipa::path(
    post,
    path = "/api/v1/swarm/launch",
    tag = "swarm",
    request_body = GoalRequest,
    responses(
        (status = 200, description = "Mission running", body = MissionView)
    )
)]
pub async fn launch(
    State(state): State<SharedState>,
    Json(req): Json<GoalRequest>,
) -> Result<Json<MissionView>, ApiError> {
    let snapshot = state.scheduler.launch(&req.goal).await?;
    Ok(Json(snapshot.into()))
}

/// Current mission snapshot
#[utoipa::path(
    get,
    path = "/api/v1/swarm/status",
    tag = "swarm",
    responses(
        (status = 200, description = "Active mission, if any", body = StatusResponse)
    )
)]
pub async fn status(State(state): State<SharedState>) -> Result<Json<StatusResponse>, ApiError> {
    let snapshot = state.scheduler.snapshot().await?;
    Ok(Json(StatusResponse {
        active: snapshot.is_some(),
        mission: snapshot.map(MissionView::from),
    }))
}

/// Pause a working agent for approval
#[utoipa::path(
    post,
    path = "/api/v1/swarm/agents/{id}/block",
    tag = "swarm",
    params(("id" = String, Path, description = "Agent id")),
    responses(
        (status = 200, description = "Agent blocked", body = ApiResponse),
        (status = 404, description = "Unknown agent", body = super::ErrorResponse),
        (status = 409, description = "Agent cannot be blocked now", body = super::ErrorResponse)
    )
)]
pub async fn block_agent(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    state.scheduler.block_agent(&id).await?;
    Ok(Json(ApiResponse::ok(format!("Agent {} blocked", id))))
}

/// Approve a blocked agent
#[utoipa::path(
    post,
    path = "/api/v1/swarm/agents/{id}/unblock",
    tag = "swarm",
    params(("id" = String, Path, description = "Agent id")),
    responses(
        (status = 200, description = "Agent resumed", body = ApiResponse)
    )
)]
pub async fn unblock_agent(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    state.scheduler.unblock_agent(&id).await?;
    Ok(Json(ApiResponse::ok(format!("Agent {} resumed", id))))
}

/// Re-run a failed agent with a fresh retry budget
#[utoipa::path(
    post,
    path = "/api/v1/swarm/agents/{id}/retry",
    tag = "swarm",
    params(("id" = String, Path, description = "Agent id")),
    responses(
        (status = 200, description = "Agent requeued", body = ApiResponse)
    )
)]
pub async fn retry_agent(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    state.scheduler.retry_agent(&id).await?;
    Ok(Json(ApiResponse::ok(format!("Agent {} retrying", id))))
}

/// Retry a failed synthesis
#[utoipa::path(
    post,
    path = "/api/v1/swarm/synthesize",
    tag = "swarm",
    responses(
        (status = 200, description = "Synthesis restarted", body = ApiResponse),
        (status = 409, description = "Synthesis has not failed", body = super::ErrorResponse)
    )
)]
pub async fn retry_synthesis(
    State(state): State<SharedState>,
) -> Result<Json<ApiResponse>, ApiError> {
    state.scheduler.retry_synthesis().await?;
    Ok(Json(ApiResponse::ok("Synthesis restarted")))
}

/// Abort the active mission
#[utoipa::path(
    post,
    path = "/api/v1/swarm/cancel",
    tag = "swarm",
    responses(
        (status = 200, description = "Mission aborted", body = ApiResponse)
    )
)]
pub async fn cancel(State(state): State<SharedState>) -> Result<Json<ApiResponse>, ApiError> {
    state.scheduler.cancel().await?;
    Ok(Json(ApiResponse::ok("Mission aborted")))
}

/// Ask a follow-up question about the final report
#[utoipa::path(
    post,
    path = "/api/v1/swarm/ask",
    tag = "swarm",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Answer", body = AskResponse),
        (status = 409, description = "No final report yet", body = super::ErrorResponse)
    )
)]
pub async fn ask(
    State(state): State<SharedState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let answer = state.scheduler.ask(&req.question).await?;
    Ok(Json(AskResponse { answer }))
}

/// SSE stream of swarm events with a heartbeat every 15 seconds
pub async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.scheduler.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        let next = tokio::time::timeout(Duration::from_secs(15), rx.recv()).await;

        let event = match next {
            Ok(Ok(event)) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Event::default().event(label(&event.kind)).data(json)
            }
            Ok(Err(RecvError::Lagged(skipped))) => {
                tracing::debug!("SSE subscriber lagged by {} events", skipped);
                Event::default().comment(format!("lagged {}", skipped))
            }
            Ok(Err(RecvError::Closed)) => return None,
            Err(_) => Event::default().comment("heartbeat"),
        };
        Some((Ok(event), rx))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
