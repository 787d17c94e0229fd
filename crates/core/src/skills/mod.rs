//! # Nexus Skills
//!
//! LLM-backed implementations of the swarm collaborators.
//!
//! ## Skills
//!
//! - `DecomposeSkill` - Split a goal into 3-5 agents, with archive memory
//! - `ExecuteSkill` - Produce one agent's work product
//! - `SynthesisSkill` - Merge agent outputs into the mission debrief
//! - `FollowUpSkill` - Answer questions about a finished mission
//!
//! [`LlmSwarm`] wires all four into the scheduler's collaborator traits.

pub mod llm_helpers;
pub mod prompts;

pub mod decompose_skill;
pub mod execute_skill;
pub mod followup_skill;
pub mod synthesis_skill;

pub mod llm_swarm;

pub use decompose_skill::{DecomposeSkill, DecompositionOutput, PlannedAgent};
pub use execute_skill::{AgentWorkOutput, ExecuteSkill};
pub use followup_skill::{FollowUpAnswer, FollowUpSkill};
pub use llm_swarm::LlmSwarm;
pub use synthesis_skill::{MissionDebrief, SynthesisSkill};
