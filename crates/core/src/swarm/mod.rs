//! # Swarm Orchestration
//!
//! Runs a mission from goal to follow-up chat.
//!
//! ## Mission Flow
//!
//! ```text
//! Goal → Decomposer → agents (Queued → Working → Complete) → Synthesizer → Report → Follow-up
//! ```
//!
//! Agents start as soon as their single dependency completes, so independent
//! branches run in parallel. All state lives in the [`SwarmScheduler`] task;
//! callers drive it through a [`SchedulerHandle`] and watch [`SwarmEvent`]s.

pub mod collaborators;
pub mod events;
pub mod mission;
pub mod scheduler;

pub use collaborators::{
    AgentExecutor, Collaborators, Decomposer, FollowUpContext, FollowUpResponder, Synthesizer,
};
pub use events::{SwarmEvent, SwarmEventKind};
pub use mission::{
    Agent, AgentOutput, AgentPlan, AgentStatus, ChatRole, ChatTurn, Mission, MissionPhase,
    MissionSnapshot,
};
pub use scheduler::{
    ExhaustedAction, RetryPolicy, SchedulerConfig, SchedulerHandle, SwarmScheduler,
};
