//! # Mission Model
//!
//! Agents, their lifecycle states and the mission that owns them.
//! Only the scheduler mutates these records; callers see clones through
//! [`MissionSnapshot`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::DecompositionError;

/// Lifecycle state of one agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Waiting for mission start or for its dependency
    Queued,
    /// Advancing progress or waiting on the executor
    Working,
    /// Paused for human approval
    Blocked,
    /// Result stored
    Complete,
    /// Retry budget exhausted
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Working => "working",
            Self::Blocked => "blocked",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

/// An agent definition as produced by the decomposer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPlan {
    /// Short identifier, e.g. "A1"
    pub id: String,
    /// Display name
    pub name: String,
    /// Responsibility of this agent, used as its task instruction
    pub role: String,
    /// Id of the agent whose output this one needs
    #[serde(default)]
    pub dependency_id: Option<String>,
}

impl AgentPlan {
    pub fn new(id: &str, name: &str, role: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            dependency_id: None,
        }
    }

    pub fn after(mut self, dependency_id: &str) -> Self {
        self.dependency_id = Some(dependency_id.to_string());
        self
    }
}

/// One unit of work inside a mission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_id: Option<String>,
    pub status: AgentStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Executor calls made so far
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Agent {
    fn from_plan(plan: AgentPlan) -> Self {
        Self {
            id: plan.id,
            name: plan.name,
            role: plan.role,
            dependency_id: plan.dependency_id,
            status: AgentStatus::Queued,
            progress: 0,
            result: None,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.dependency_id.is_none()
    }

    /// The definition handed to the executor
    pub fn plan(&self) -> AgentPlan {
        AgentPlan {
            id: self.id.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
            dependency_id: self.dependency_id.clone(),
        }
    }
}

/// A completed agent's contribution, as fed to the synthesizer and responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub name: String,
    pub role: String,
    pub result: String,
}

/// Phase of the mission as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionPhase {
    /// Decomposed, waiting for start
    Planned,
    /// Agents executing
    Running,
    /// All agents complete, synthesizer in flight
    Synthesizing,
    /// Final report stored
    Complete,
    /// Synthesizer failed, may be retried
    SynthesisFailed,
    /// Cancelled by the user
    Aborted,
}

/// One decomposition-to-synthesis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub goal: String,
    pub agents: Vec<Agent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Mission {
    /// Build a mission from a decomposer plan, rejecting plans the scheduler
    /// could never finish: duplicate or blank ids, self or dangling
    /// dependencies, and dependency cycles.
    pub fn from_plans(goal: &str, plans: Vec<AgentPlan>) -> Result<Self, DecompositionError> {
        if plans.is_empty() {
            return Err(DecompositionError::InvalidPlan(
                "plan contains no agents".to_string(),
            ));
        }

        let plans: Vec<AgentPlan> = plans.into_iter().map(normalize_plan).collect();

        let mut ids = HashSet::new();
        for plan in &plans {
            if plan.id.is_empty() {
                return Err(DecompositionError::InvalidPlan(format!(
                    "agent '{}' has no id",
                    plan.name
                )));
            }
            if !ids.insert(plan.id.as_str()) {
                return Err(DecompositionError::InvalidPlan(format!(
                    "duplicate agent id '{}'",
                    plan.id
                )));
            }
        }

        for plan in &plans {
            if let Some(dep) = &plan.dependency_id {
                if dep == &plan.id {
                    return Err(DecompositionError::InvalidPlan(format!(
                        "agent '{}' depends on itself",
                        plan.id
                    )));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(DecompositionError::InvalidPlan(format!(
                        "agent '{}' depends on unknown agent '{}'",
                        plan.id, dep
                    )));
                }
            }
        }

        if let Some(id) = find_cycle(&plans) {
            return Err(DecompositionError::InvalidPlan(format!(
                "dependency cycle through agent '{}'",
                id
            )));
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal: goal.to_string(),
            agents: plans.into_iter().map(Agent::from_plan).collect(),
            final_report: None,
            created_at: Utc::now(),
        })
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn agent_mut(&mut self, id: &str) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    /// Ids of agents that name `id` as their dependency, in declaration order
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.agents
            .iter()
            .filter(|a| a.dependency_id.as_deref() == Some(id))
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn all_complete(&self) -> bool {
        !self.agents.is_empty()
            && self
                .agents
                .iter()
                .all(|a| a.status == AgentStatus::Complete)
    }

    pub fn outputs(&self) -> Vec<AgentOutput> {
        self.agents
            .iter()
            .map(|a| AgentOutput {
                name: a.name.clone(),
                role: a.role.clone(),
                result: a.result.clone().unwrap_or_default(),
            })
            .collect()
    }
}

/// Providers sometimes send "" or "none" instead of omitting the field
fn normalize_plan(mut plan: AgentPlan) -> AgentPlan {
    plan.id = plan.id.trim().to_string();
    plan.dependency_id = plan
        .dependency_id
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("none"));
    plan
}

/// Follow each dependency chain; a chain longer than the plan is a cycle
fn find_cycle(plans: &[AgentPlan]) -> Option<String> {
    let deps: HashMap<&str, &str> = plans
        .iter()
        .filter_map(|p| p.dependency_id.as_deref().map(|d| (p.id.as_str(), d)))
        .collect();

    for plan in plans {
        let mut current = plan.id.as_str();
        let mut steps = 0;
        while let Some(next) = deps.get(current) {
            steps += 1;
            if steps > plans.len() {
                return Some(plan.id.clone());
            }
            current = next;
        }
    }
    None
}

/// Who wrote a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One follow-up exchange entry, never mutated after append
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(role: ChatRole, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Read model of the active mission handed to callers
#[derive(Debug, Clone, Serialize)]
pub struct MissionSnapshot {
    pub mission: Mission,
    pub phase: MissionPhase,
    pub chat: Vec<ChatTurn>,
}

impl MissionSnapshot {
    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.mission.agent(id)
    }
}
