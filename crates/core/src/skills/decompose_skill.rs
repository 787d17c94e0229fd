//! # Decompose Skill
//!
//! Turns a goal into 3-5 agent definitions, using recent archived missions
//! as memory so related work can be reused instead of redone.

use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::MissionRecord;
use crate::swarm::AgentPlan;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Characters of each archived report shown to the planner
const MEMORY_REPORT_CHARS: usize = 300;

/// One agent proposed by the planner
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct PlannedAgent {
    /// Short unique ID such as "A1"
    pub id: String,
    /// Short title such as "Market Scout"
    pub name: String,
    /// One-sentence responsibility
    pub role: String,
    /// ID of the agent this one must wait for
    #[serde(default)]
    pub dependency_id: Option<String>,
}

/// Output from the decompose skill
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct DecompositionOutput {
    pub agents: Vec<PlannedAgent>,
}

impl DecompositionOutput {
    pub fn into_plans(self) -> Vec<AgentPlan> {
        self.agents
            .into_iter()
            .map(|a| AgentPlan {
                id: a.id,
                name: a.name,
                role: a.role,
                dependency_id: a.dependency_id,
            })
            .collect()
    }
}

pub struct DecomposeSkill;

impl DecomposeSkill {
    #[tracing::instrument(skip_all, fields(memory = past_missions.len()))]
    pub async fn run(
        goal: &str,
        past_missions: &[MissionRecord],
        system_prompt: &str,
        config: &ModelConfig,
    ) -> anyhow::Result<DecompositionOutput> {
        let instructions = format!("{}{}", system_prompt, memory_context(past_missions));
        let prompt = format!("Goal: {}", goal);
        run_llm_function!(config, DecompositionOutput, instructions.as_str(), prompt)
    }
}

/// Memory block appended to the planner's instructions
pub fn memory_context(past_missions: &[MissionRecord]) -> String {
    if past_missions.is_empty() {
        return String::new();
    }

    let missions: Vec<String> = past_missions
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let summary: String = m.report.chars().take(MEMORY_REPORT_CHARS).collect();
            format!(
                "MISSION {}: \"{}\"\nRESULT SUMMARY: {}...",
                i + 1,
                m.goal,
                summary
            )
        })
        .collect();

    format!(
        "\n\n## Swarm Memory (previous missions)\n\n{}\n\n\
         Use the memory above. If the new goal relates to previous work, assign \
         agents to build on that result instead of redoing it.\n",
        missions.join("\n\n")
    )
}
