//! # Swarm Errors
//!
//! Typed failures for each collaborator call plus the errors returned by
//! scheduler commands. Every error is scoped: a failing agent, synthesis or
//! follow-up turn never discards work that already completed.

use std::time::Duration;
use thiserror::Error;

use crate::swarm::{AgentStatus, MissionPhase};

/// The goal could not be turned into an agent plan. No agents exist.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecompositionError {
    #[error("goal is empty")]
    EmptyGoal,
    #[error("decomposer provider failed: {0}")]
    Provider(String),
    #[error("decomposer returned an invalid plan: {0}")]
    InvalidPlan(String),
    #[error("decomposer timed out after {0:?}")]
    Timeout(Duration),
    #[error("decomposition was superseded by a newer goal")]
    Superseded,
}

/// A single agent's executor call failed. Siblings are unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("executor provider failed: {0}")]
    Provider(String),
    #[error("executor timed out after {0:?}")]
    Timeout(Duration),
}

/// The final report could not be produced. Agents remain complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("synthesizer provider failed: {0}")]
    Provider(String),
    #[error("synthesizer timed out after {0:?}")]
    Timeout(Duration),
    #[error("mission is not ready for synthesis")]
    NotReady,
}

/// One follow-up turn failed. The report and earlier turns are untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("question is empty")]
    EmptyQuestion,
    #[error("mission has no final report yet")]
    NoReport,
    #[error("responder provider failed: {0}")]
    Provider(String),
    #[error("responder timed out after {0:?}")]
    Timeout(Duration),
    #[error("mission was replaced before the answer arrived")]
    Superseded,
}

/// Errors returned by [`SchedulerHandle`](crate::swarm::SchedulerHandle) commands.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no active mission")]
    NoMission,
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("cannot {action} agent {agent_id} while it is {status:?}")]
    InvalidTransition {
        agent_id: String,
        status: AgentStatus,
        action: &'static str,
    },
    #[error("cannot {action} while mission is {phase:?}")]
    InvalidPhase {
        phase: MissionPhase,
        action: &'static str,
    },
    #[error(transparent)]
    Decomposition(#[from] DecompositionError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("scheduler has shut down")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ExecutionError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "executor timed out after 5s");

        let err = SchedulerError::InvalidTransition {
            agent_id: "A1".to_string(),
            status: AgentStatus::Queued,
            action: "block",
        };
        assert_eq!(err.to_string(), "cannot block agent A1 while it is Queued");
    }

    #[test]
    fn test_transparent_wrapping() {
        let err: SchedulerError = DecompositionError::EmptyGoal.into();
        assert_eq!(err.to_string(), "goal is empty");
        assert!(matches!(
            err,
            SchedulerError::Decomposition(DecompositionError::EmptyGoal)
        ));
    }
}
