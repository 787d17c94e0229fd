//! # Follow-up Skill
//!
//! Answers questions about a finished mission from its report, agent
//! outputs and the recent chat history.

use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::swarm::{ChatRole, FollowUpContext};
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Output from the follow-up skill
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct FollowUpAnswer {
    pub answer: String,
}

pub struct FollowUpSkill;

impl FollowUpSkill {
    #[tracing::instrument(skip_all, fields(history = context.history.len()))]
    pub async fn run(
        context: &FollowUpContext,
        system_prompt: &str,
        config: &ModelConfig,
    ) -> anyhow::Result<FollowUpAnswer> {
        run_llm_function!(config, FollowUpAnswer, system_prompt, render_context(context))
    }
}

fn render_context(context: &FollowUpContext) -> String {
    let agent_data: Vec<String> = context
        .outputs
        .iter()
        .map(|o| format!("[AGENT: {}]: {}", o.name, o.result))
        .collect();
    let history: Vec<String> = context
        .history
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                ChatRole::User => "USER",
                ChatRole::Assistant => "ASSISTANT",
            };
            format!("{}: {}", speaker, turn.content)
        })
        .collect();

    format!(
        "CONTEXT:\nOriginal Goal: {}\nAgent Data:\n{}\nFinal Report:\n{}\n\n\
         CHAT HISTORY:\n{}\n\nUSER QUESTION: {}",
        context.goal,
        agent_data.join("\n"),
        context.report,
        history.join("\n"),
        context.question
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::{AgentOutput, ChatTurn};

    #[test]
    fn test_render_context() {
        let context = FollowUpContext {
            goal: "Explain tides".to_string(),
            outputs: vec![AgentOutput {
                name: "Oceanographer".to_string(),
                role: "Explains forces".to_string(),
                result: "Moon gravity".to_string(),
            }],
            report: "Tides follow the moon.".to_string(),
            history: vec![
                ChatTurn::new(ChatRole::User, "Why twice a day?"),
                ChatTurn::new(ChatRole::Assistant, "Two bulges."),
            ],
            question: "And the sun?".to_string(),
        };

        let text = render_context(&context);
        assert!(text.contains("[AGENT: Oceanographer]: Moon gravity"));
        assert!(text.contains("USER: Why twice a day?\nASSISTANT: Two bulges."));
        assert!(text.ends_with("USER QUESTION: And the sun?"));
    }
}
