//! # Nexus Models
//!
//! LLM provider selection for the swarm. Each swarm role (decomposer,
//! executor, synthesizer, responder) gets its own [`ModelConfig`] so planning
//! can run on a strong model while agent work runs on a fast one.

use serde::{Deserialize, Serialize};

/// Supported LLM providers
///
/// Each reads its key from the environment:
/// - Anthropic (Claude) - `ANTHROPIC_API_KEY`
/// - OpenAI (GPT) - `OPENAI_API_KEY`
/// - Gemini (Google) - `GEMINI_API_KEY`
/// - OpenRouter (Gateway) - `OPENROUTER_API_KEY`
/// - Grok (xAI) - `XAI_API_KEY`
/// - DeepSeek - `DEEPSEEK_API_KEY`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    #[default]
    Gemini,
    OpenRouter,
    Grok,
    DeepSeek,
}

impl LlmProvider {
    pub fn all() -> Vec<LlmProvider> {
        vec![
            LlmProvider::Anthropic,
            LlmProvider::OpenAI,
            LlmProvider::Gemini,
            LlmProvider::OpenRouter,
            LlmProvider::Grok,
            LlmProvider::DeepSeek,
        ]
    }

    /// Parse a provider id such as "openai" (case-insensitive)
    pub fn parse(id: &str) -> Option<LlmProvider> {
        serde_json::from_value(serde_json::Value::String(id.trim().to_lowercase())).ok()
    }

    /// Lowercase id used in config files
    pub fn id(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::OpenAI => "openai",
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenRouter => "openrouter",
            LlmProvider::Grok => "grok",
            LlmProvider::DeepSeek => "deepseek",
        }
    }

    /// Model used when only the provider is configured
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
            LlmProvider::OpenAI => "gpt-4o",
            LlmProvider::Gemini => "gemini-3-pro-preview",
            LlmProvider::OpenRouter => "anthropic/claude-3.5-sonnet",
            LlmProvider::Grok => "grok-2",
            LlmProvider::DeepSeek => "deepseek-chat",
        }
    }

    pub fn env_var(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
            LlmProvider::Grok => "XAI_API_KEY",
            LlmProvider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    /// Display name for logs and the API
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Gemini => "Gemini",
            LlmProvider::OpenRouter => "OpenRouter",
            LlmProvider::Grok => "Grok",
            LlmProvider::DeepSeek => "DeepSeek",
        }
    }

    /// Whether this provider supports custom base URL
    pub fn supports_base_url(&self) -> bool {
        matches!(self, LlmProvider::OpenAI)
    }
}

/// Provider and model for one swarm role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "gemini-3-pro-preview", "gpt-4o")
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::with_provider(LlmProvider::Gemini, "gemini-3-pro-preview")
    }
}

impl ModelConfig {
    /// Create config for a specific provider
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
        }
    }

    /// Set base URL (for OpenAI-compatible endpoints)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// The four collaborator roles that call an LLM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmRole {
    Decomposer,
    Executor,
    Synthesizer,
    Responder,
}

impl SwarmRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwarmRole::Decomposer => "decomposer",
            SwarmRole::Executor => "executor",
            SwarmRole::Synthesizer => "synthesizer",
            SwarmRole::Responder => "responder",
        }
    }

    pub fn all() -> [SwarmRole; 4] {
        [
            SwarmRole::Decomposer,
            SwarmRole::Executor,
            SwarmRole::Synthesizer,
            SwarmRole::Responder,
        ]
    }
}

/// Model selection for every swarm role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmModels {
    pub decomposer: ModelConfig,
    pub executor: ModelConfig,
    pub synthesizer: ModelConfig,
    pub responder: ModelConfig,
}

impl Default for SwarmModels {
    fn default() -> Self {
        Self {
            decomposer: ModelConfig::default(),
            executor: ModelConfig::with_provider(LlmProvider::Gemini, "gemini-2.5-flash"),
            synthesizer: ModelConfig::default(),
            responder: ModelConfig::default(),
        }
    }
}

impl SwarmModels {
    /// Same model for every role
    pub fn uniform(config: ModelConfig) -> Self {
        Self {
            decomposer: config.clone(),
            executor: config.clone(),
            synthesizer: config.clone(),
            responder: config,
        }
    }

    pub fn for_role(&self, role: SwarmRole) -> &ModelConfig {
        match role {
            SwarmRole::Decomposer => &self.decomposer,
            SwarmRole::Executor => &self.executor,
            SwarmRole::Synthesizer => &self.synthesizer,
            SwarmRole::Responder => &self.responder,
        }
    }

    pub fn set_role(&mut self, role: SwarmRole, config: ModelConfig) {
        match role {
            SwarmRole::Decomposer => self.decomposer = config,
            SwarmRole::Executor => self.executor = config,
            SwarmRole::Synthesizer => self.synthesizer = config,
            SwarmRole::Responder => self.responder = config,
        }
    }
}
