//! # Execute Skill
//!
//! Produces one agent's short work product.

use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::swarm::AgentPlan;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Output from the execute skill
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct AgentWorkOutput {
    /// The agent's work product, under 80 words
    pub result: String,
}

pub struct ExecuteSkill;

impl ExecuteSkill {
    #[tracing::instrument(skip_all, fields(agent = %agent.id))]
    pub async fn run(
        agent: &AgentPlan,
        goal: &str,
        system_prompt: &str,
        config: &ModelConfig,
    ) -> anyhow::Result<AgentWorkOutput> {
        run_llm_function!(config, AgentWorkOutput, system_prompt, briefing(agent, goal))
    }
}

fn briefing(agent: &AgentPlan, goal: &str) -> String {
    format!(
        "I am agent {} (ID: {}). My role is: {}.\nThe overall goal of the swarm is: {}",
        agent.name, agent.id, agent.role, goal
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_briefing_names_agent_and_goal() {
        let agent = AgentPlan::new("A2", "Analyst", "Compares vendors");
        let text = briefing(&agent, "Pick a CRM");
        assert!(text.contains("agent Analyst (ID: A2)"));
        assert!(text.contains("My role is: Compares vendors."));
        assert!(text.ends_with("Pick a CRM"));
    }
}
