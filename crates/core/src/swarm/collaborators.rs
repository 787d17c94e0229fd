//! # Collaborators
//!
//! The four request/response calls the scheduler makes. Each is a trait so
//! the scheduler can run against the LLM-backed [`LlmSwarm`](crate::skills::LlmSwarm)
//! or any scripted implementation.

use async_trait::async_trait;
use std::sync::Arc;

use super::mission::{AgentOutput, AgentPlan, ChatTurn};
use crate::error::{DecompositionError, ExecutionError, QueryError, SynthesisError};
use crate::state::MissionRecord;

/// Breaks a goal into agent definitions
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(
        &self,
        goal: &str,
        past_missions: &[MissionRecord],
    ) -> Result<Vec<AgentPlan>, DecompositionError>;
}

/// Produces one agent's free-text result
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, agent: &AgentPlan, goal: &str) -> Result<String, ExecutionError>;
}

/// Merges all agent results into the final report
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, goal: &str, outputs: &[AgentOutput])
        -> Result<String, SynthesisError>;
}

/// Everything a follow-up answer may draw on
#[derive(Debug, Clone)]
pub struct FollowUpContext {
    pub goal: String,
    pub outputs: Vec<AgentOutput>,
    pub report: String,
    /// Most recent turns only, bounded by `chat_window`
    pub history: Vec<ChatTurn>,
    pub question: String,
}

/// Answers questions about a finished mission
#[async_trait]
pub trait FollowUpResponder: Send + Sync {
    async fn answer(&self, context: &FollowUpContext) -> Result<String, QueryError>;
}

/// The set of collaborators a scheduler runs against
#[derive(Clone)]
pub struct Collaborators {
    pub decomposer: Arc<dyn Decomposer>,
    pub executor: Arc<dyn AgentExecutor>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub responder: Arc<dyn FollowUpResponder>,
}

impl Collaborators {
    /// Use one value that implements every collaborator role
    pub fn uniform<T>(backend: Arc<T>) -> Self
    where
        T: Decomposer + AgentExecutor + Synthesizer + FollowUpResponder + 'static,
    {
        Self {
            decomposer: backend.clone(),
            executor: backend.clone(),
            synthesizer: backend.clone(),
            responder: backend,
        }
    }
}
