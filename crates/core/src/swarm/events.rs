//! # Swarm Events
//!
//! Every state change the scheduler makes is broadcast as a [`SwarmEvent`].
//! Subscribers render progress from these; the snapshot stays authoritative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of swarm event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SwarmEventKind {
    // === Mission lifecycle ===
    /// Decomposer produced a valid plan
    MissionPlanned,
    /// Root agents released
    MissionStarted,
    /// A newer goal replaced this mission
    MissionSuperseded,
    /// User cancelled the mission
    MissionAborted,
    /// Nothing can progress without manual intervention
    MissionStalled,
    // === Agent lifecycle ===
    /// Agent moved from queued to working
    AgentStarted,
    /// Progress tick
    AgentProgress,
    /// Agent paused for approval
    AgentBlocked,
    /// Agent resumed after approval
    AgentUnblocked,
    /// Executor call sent
    AgentDispatched,
    /// Executor returned a result
    AgentCompleted,
    /// Executor call failed
    AgentFailed,
    /// Executor call will be retried after backoff
    AgentRetrying,
    // === Synthesis ===
    SynthesisStarted,
    SynthesisCompleted,
    SynthesisFailed,
    // === Follow-up chat ===
    FollowUpAnswered,
    FollowUpFailed,
}

/// An event in the swarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmEvent {
    /// Unique event ID
    pub id: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Kind of event
    pub kind: SwarmEventKind,
    /// Mission the event belongs to
    pub mission_id: String,
    /// Agent the event concerns, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Associated data (JSON)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl SwarmEvent {
    /// Create a new mission-level event
    pub fn new(kind: SwarmEventKind, mission_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            mission_id: mission_id.to_string(),
            agent_id: None,
            data: None,
        }
    }

    /// Attach the agent this event concerns
    pub fn for_agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_agent(&self, kind: SwarmEventKind, agent_id: &str) -> bool {
        self.kind == kind && self.agent_id.as_deref() == Some(agent_id)
    }
}
