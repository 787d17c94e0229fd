//! # LLM Swarm
//!
//! Implements every collaborator role with the skills in this module.
//! System prompts come from the `prompt_templates` table when a database is
//! attached, falling back to the bundled defaults.

use async_trait::async_trait;
use std::sync::Arc;

use super::decompose_skill::DecomposeSkill;
use super::execute_skill::ExecuteSkill;
use super::followup_skill::FollowUpSkill;
use super::prompts;
use super::synthesis_skill::SynthesisSkill;
use crate::error::{DecompositionError, ExecutionError, QueryError, SynthesisError};
use crate::models::{SwarmModels, SwarmRole};
use crate::state::{MissionRecord, NexusDb};
use crate::swarm::{
    AgentExecutor, AgentOutput, AgentPlan, Decomposer, FollowUpContext, FollowUpResponder,
    Synthesizer,
};

/// LLM-backed collaborators
pub struct LlmSwarm {
    models: SwarmModels,
    prompts: Option<Arc<NexusDb>>,
}

impl LlmSwarm {
    pub fn new(models: SwarmModels) -> Self {
        Self {
            models,
            prompts: None,
        }
    }

    /// Load system prompts from the database
    pub fn with_prompt_store(mut self, db: Arc<NexusDb>) -> Self {
        self.prompts = Some(db);
        self
    }

    pub fn models(&self) -> &SwarmModels {
        &self.models
    }

    fn system_prompt(&self, role: SwarmRole) -> String {
        let slug = slug_for(role);
        if let Some(db) = &self.prompts {
            match db.get_prompt(slug) {
                Ok(prompt) => return prompt,
                Err(e) => tracing::debug!("Using bundled prompt for {}: {}", slug, e),
            }
        }
        prompts::default_for(slug).unwrap_or_default().to_string()
    }
}

fn slug_for(role: SwarmRole) -> &'static str {
    match role {
        SwarmRole::Decomposer => prompts::DECOMPOSER,
        SwarmRole::Executor => prompts::EXECUTOR,
        SwarmRole::Synthesizer => prompts::SYNTHESIZER,
        SwarmRole::Responder => prompts::RESPONDER,
    }
}

/// Full error chain, one line
fn describe(err: anyhow::Error) -> String {
    format!("{:#}", err)
}

#[async_trait]
impl Decomposer for LlmSwarm {
    async fn decompose(
        &self,
        goal: &str,
        past_missions: &[MissionRecord],
    ) -> Result<Vec<AgentPlan>, DecompositionError> {
        let system_prompt = self.system_prompt(SwarmRole::Decomposer);
        let output = DecomposeSkill::run(goal, past_missions, &system_prompt, &self.models.decomposer)
            .await
            .map_err(|e| DecompositionError::Provider(describe(e)))?;
        Ok(output.into_plans())
    }
}

#[async_trait]
impl AgentExecutor for LlmSwarm {
    async fn execute(&self, agent: &AgentPlan, goal: &str) -> Result<String, ExecutionError> {
        let system_prompt = self.system_prompt(SwarmRole::Executor);
        let output = ExecuteSkill::run(agent, goal, &system_prompt, &self.models.executor)
            .await
            .map_err(|e| ExecutionError::Provider(describe(e)))?;

        if output.result.trim().is_empty() {
            return Ok("Task complete.".to_string());
        }
        Ok(output.result)
    }
}

#[async_trait]
impl Synthesizer for LlmSwarm {
    async fn synthesize(
        &self,
        goal: &str,
        outputs: &[AgentOutput],
    ) -> Result<String, SynthesisError> {
        let system_prompt = self.system_prompt(SwarmRole::Synthesizer);
        let output = SynthesisSkill::run(goal, outputs, &system_prompt, &self.models.synthesizer)
            .await
            .map_err(|e| SynthesisError::Provider(describe(e)))?;

        if output.report.trim().is_empty() {
            return Err(SynthesisError::Provider("empty report".to_string()));
        }
        Ok(output.report)
    }
}

#[async_trait]
impl FollowUpResponder for LlmSwarm {
    async fn answer(&self, context: &FollowUpContext) -> Result<String, QueryError> {
        let system_prompt = self.system_prompt(SwarmRole::Responder);
        let output = FollowUpSkill::run(context, &system_prompt, &self.models.responder)
            .await
            .map_err(|e| QueryError::Provider(describe(e)))?;
        Ok(output.answer)
    }
}
