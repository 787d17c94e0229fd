//! # Nexus API
//!
//! Axum handlers grouped by resource. Scheduler errors map onto HTTP status
//! codes here so every handler can simply return `Result<_, ApiError>`.

pub mod archive;
pub mod prompts;
pub mod swarm;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use nexus_core::error::{DecompositionError, QueryError, SchedulerError, SynthesisError};
use nexus_core::swarm::{Agent, ChatTurn, MissionSnapshot};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Scheduler(SchedulerError),
    NotFound(String),
    Internal(String),
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        ApiError::Scheduler(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", err))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Scheduler(err) => scheduler_status(err),
        }
    }
}

fn scheduler_status(err: &SchedulerError) -> StatusCode {
    use SchedulerError as S;
    match err {
        S::NoMission | S::UnknownAgent(_) => StatusCode::NOT_FOUND,
        S::InvalidTransition { .. } | S::InvalidPhase { .. } => StatusCode::CONFLICT,
        S::Closed => StatusCode::SERVICE_UNAVAILABLE,

        S::Decomposition(DecompositionError::EmptyGoal) => StatusCode::BAD_REQUEST,
        S::Decomposition(DecompositionError::Superseded) => StatusCode::CONFLICT,
        S::Decomposition(DecompositionError::Provider(_))
        | S::Decomposition(DecompositionError::InvalidPlan(_)) => StatusCode::BAD_GATEWAY,
        S::Decomposition(DecompositionError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,

        S::Synthesis(SynthesisError::NotReady) => StatusCode::CONFLICT,
        S::Synthesis(SynthesisError::Provider(_)) => StatusCode::BAD_GATEWAY,
        S::Synthesis(SynthesisError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,

        S::Query(QueryError::EmptyQuestion) => StatusCode::BAD_REQUEST,
        S::Query(QueryError::NoReport) | S::Query(QueryError::Superseded) => StatusCode::CONFLICT,
        S::Query(QueryError::Provider(_)) => StatusCode::BAD_GATEWAY,
        S::Query(QueryError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            ApiError::Scheduler(err) => err.to_string(),
            ApiError::NotFound(msg) | ApiError::Internal(msg) => msg,
        };
        if status.is_server_error() {
            tracing::warn!(%status, "{}", error);
        }
        (status, Json(ErrorResponse { error })).into_response()
    }
}

// === Views ===

/// Serialize a unit enum to its snake_case label
pub(crate) fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AgentView {
    pub id: String,
    pub name: String,
    pub role: String,
    pub dependency_id: Option<String>,
    /// queued | working | blocked | complete | failed
    pub status: String,
    pub progress: u8,
    pub result: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl From<&Agent> for AgentView {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id.clone(),
            name: agent.name.clone(),
            role: agent.role.clone(),
            dependency_id: agent.dependency_id.clone(),
            status: agent.status.as_str().to_string(),
            progress: agent.progress,
            result: agent.result.clone(),
            attempts: agent.attempts,
            last_error: agent.last_error.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatTurnView {
    /// user | assistant
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

impl From<&ChatTurn> for ChatTurnView {
    fn from(turn: &ChatTurn) -> Self {
        Self {
            role: label(&turn.role),
            content: turn.content.clone(),
            timestamp: turn.timestamp.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MissionView {
    pub id: String,
    pub goal: String,
    /// planned | running | synthesizing | complete | synthesis_failed | aborted
    pub phase: String,
    pub agents: Vec<AgentView>,
    pub final_report: Option<String>,
    pub chat: Vec<ChatTurnView>,
    pub created_at: String,
}

impl From<MissionSnapshot> for MissionView {
    fn from(snapshot: MissionSnapshot) -> Self {
        Self {
            phase: label(&snapshot.phase),
            agents: snapshot.mission.agents.iter().map(AgentView::from).collect(),
            chat: snapshot.chat.iter().map(ChatTurnView::from).collect(),
            created_at: snapshot.mission.created_at.to_rfc3339(),
            id: snapshot.mission.id,
            goal: snapshot.mission.goal,
            final_report: snapshot.mission.final_report,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub active: bool,
    pub mission: Option<MissionView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::swarm::{AgentPlan, AgentStatus, Mission, MissionPhase};
    use std::time::Duration;

    #[test]
    fn test_status_codes() {
        let cases = [
            (SchedulerError::NoMission, StatusCode::NOT_FOUND),
            (SchedulerError::UnknownAgent("A9".into()), StatusCode::NOT_FOUND),
            (
                SchedulerError::InvalidTransition {
                    agent_id: "A1".into(),
                    status: AgentStatus::Complete,
                    action: "block",
                },
                StatusCode::CONFLICT,
            ),
            (SchedulerError::from(DecompositionError::EmptyGoal), StatusCode::BAD_REQUEST),
            (
                SchedulerError::from(DecompositionError::InvalidPlan("cycle".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                SchedulerError::from(SynthesisError::Timeout(Duration::from_secs(1))),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (SchedulerError::from(QueryError::NoReport), StatusCode::CONFLICT),
            (SchedulerError::Closed, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_mission_view_labels() {
        let mission = Mission::from_plans(
            "Plan a trip",
            vec![
                AgentPlan::new("A1", "Scout", "Find flights"),
                AgentPlan::new("A2", "Booker", "Book hotel").after("A1"),
            ],
        )
        .unwrap();
        let view = MissionView::from(MissionSnapshot {
            mission,
            phase: MissionPhase::SynthesisFailed,
            chat: vec![ChatTurn::new(nexus_core::swarm::ChatRole::User, "hi")],
        });

        assert_eq!(view.phase, "synthesis_failed");
        assert_eq!(view.agents[1].status, "queued");
        assert_eq!(view.agents[1].dependency_id.as_deref(), Some("A1"));
        assert_eq!(view.chat[0].role, "user");
    }
}
