//! # Synthesis Skill
//!
//! Merges every agent's output into the final mission debrief.

use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::swarm::AgentOutput;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Output from the synthesis skill
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct MissionDebrief {
    /// Markdown report
    pub report: String,
}

pub struct SynthesisSkill;

impl SynthesisSkill {
    #[tracing::instrument(skip_all, fields(agents = outputs.len()))]
    pub async fn run(
        goal: &str,
        outputs: &[AgentOutput],
        system_prompt: &str,
        config: &ModelConfig,
    ) -> anyhow::Result<MissionDebrief> {
        let prompt = format!(
            "ORIGINAL MISSION: {}\n\nSWARM AGENT OUTPUTS:\n{}",
            goal,
            render_outputs(outputs)
        );
        run_llm_function!(config, MissionDebrief, system_prompt, prompt)
    }
}

/// Agent outputs in declaration order, one block each
pub fn render_outputs(outputs: &[AgentOutput]) -> String {
    outputs
        .iter()
        .map(|o| format!("[AGENT: {} ({})]:\n{}", o.name, o.role, o.result))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_outputs() {
        let outputs = vec![
            AgentOutput {
                name: "Scout".to_string(),
                role: "Finds data".to_string(),
                result: "- 3 vendors".to_string(),
            },
            AgentOutput {
                name: "Writer".to_string(),
                role: "Writes it up".to_string(),
                result: "Draft ready".to_string(),
            },
        ];
        assert_eq!(
            render_outputs(&outputs),
            "[AGENT: Scout (Finds data)]:\n- 3 vendors\n\n[AGENT: Writer (Writes it up)]:\nDraft ready"
        );
    }
}
