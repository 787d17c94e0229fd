//! # Persisted Configuration
//!
//! User overrides stored in `.nexus/config.json`. Every field is optional;
//! PATCH requests merge field-by-field and unset fields fall back to the
//! core defaults.

use nexus_core::models::{LlmProvider, ModelConfig, SwarmModels, SwarmRole};
use nexus_core::swarm::{ExhaustedAction, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use utoipa::ToSchema;

pub const CONFIG_PATH: &str = ".nexus/config.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, ToSchema)]
pub struct PersistedConfig {
    // === Models ===
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Role ("decomposer", "executor", ...) -> provider id
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub per_role_providers: HashMap<String, String>,
    /// Role -> model name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub per_role_models: HashMap<String, String>,

    // === Scheduler ===
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_increment: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_increment: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decomposer_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    /// "fail" or "stall"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_exhausted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_window: Option<usize>,
}

impl PersistedConfig {
    /// Missing or unreadable files yield the empty config
    pub async fn load_from(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub async fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(path, content).await
    }

    pub fn merge(&mut self, other: PersistedConfig) {
        self.global_provider = other.global_provider.or(self.global_provider.take());
        self.global_model = other.global_model.or(self.global_model.take());
        self.base_url = other.base_url.or(self.base_url.take());
        self.per_role_providers.extend(other.per_role_providers);
        self.per_role_models.extend(other.per_role_models);

        self.tick_interval_ms = other.tick_interval_ms.or(self.tick_interval_ms);
        self.min_increment = other.min_increment.or(self.min_increment);
        self.max_increment = other.max_increment.or(self.max_increment);
        self.settle_delay_ms = other.settle_delay_ms.or(self.settle_delay_ms);
        self.decomposer_timeout_secs = other.decomposer_timeout_secs.or(self.decomposer_timeout_secs);
        self.executor_timeout_secs = other.executor_timeout_secs.or(self.executor_timeout_secs);
        self.synthesis_timeout_secs = other.synthesis_timeout_secs.or(self.synthesis_timeout_secs);
        self.query_timeout_secs = other.query_timeout_secs.or(self.query_timeout_secs);
        self.max_attempts = other.max_attempts.or(self.max_attempts);
        self.backoff_ms = other.backoff_ms.or(self.backoff_ms);
        self.on_exhausted = other.on_exhausted.or(self.on_exhausted.take());
        self.memory_depth = other.memory_depth.or(self.memory_depth);
        self.chat_window = other.chat_window.or(self.chat_window);
    }

    /// Resolve per-role models: defaults, then global, then per-role overrides
    pub fn swarm_models(&self) -> SwarmModels {
        let mut models = SwarmModels::default();

        match self.global_provider.as_deref().map(parse_provider) {
            Some(Some(provider)) => {
                let model = self
                    .global_model
                    .clone()
                    .unwrap_or_else(|| provider.default_model().to_string());
                let mut config = ModelConfig::with_provider(provider, model);
                config.base_url = self.base_url.clone();
                models = SwarmModels::uniform(config);
            }
            Some(None) => {}
            None => {
                if let Some(model) = &self.global_model {
                    for role in SwarmRole::all() {
                        let mut config = models.for_role(role).clone();
                        config.model = model.clone();
                        models.set_role(role, config);
                    }
                }
            }
        }

        for role in SwarmRole::all() {
            let provider = self
                .per_role_providers
                .get(role.as_str())
                .and_then(|p| parse_provider(p));
            let model = self.per_role_models.get(role.as_str());
            if provider.is_none() && model.is_none() {
                continue;
            }

            let mut config = models.for_role(role).clone();
            if let Some(provider) = provider {
                if provider != config.provider {
                    config.model = provider.default_model().to_string();
                    config.provider = provider;
                }
            }
            if let Some(model) = model {
                config.model = model.clone();
            }
            models.set_role(role, config);
        }

        models
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let mut config = SchedulerConfig::default();

        if let Some(v) = self.tick_interval_ms {
            config.tick_interval_ms = v;
        }
        if let Some(v) = self.min_increment {
            config.min_increment = v;
        }
        if let Some(v) = self.max_increment {
            config.max_increment = v;
        }
        if let Some(v) = self.settle_delay_ms {
            config.settle_delay_ms = v;
        }
        if let Some(v) = self.decomposer_timeout_secs {
            config.decomposer_timeout_secs = v;
        }
        if let Some(v) = self.executor_timeout_secs {
            config.executor_timeout_secs = v;
        }
        if let Some(v) = self.synthesis_timeout_secs {
            config.synthesis_timeout_secs = v;
        }
        if let Some(v) = self.query_timeout_secs {
            config.query_timeout_secs = v;
        }
        if let Some(v) = self.max_attempts {
            config.retry.max_attempts = v;
        }
        if let Some(v) = self.backoff_ms {
            config.retry.backoff_ms = v;
        }
        match self.on_exhausted.as_deref() {
            Some("fail") => config.retry.on_exhausted = ExhaustedAction::Fail,
            Some("stall") => config.retry.on_exhausted = ExhaustedAction::Stall,
            Some(other) => tracing::warn!("Unknown on_exhausted value '{}', using fail", other),
            None => {}
        }
        if let Some(v) = self.memory_depth {
            config.memory_depth = v;
        }
        if let Some(v) = self.chat_window {
            config.chat_window = v;
        }

        config
    }
}

fn parse_provider(id: &str) -> Option<LlmProvider> {
    let provider = LlmProvider::parse(id);
    if provider.is_none() {
        tracing::warn!("Unknown provider '{}' in config, ignoring", id);
    }
    provider
}

/// Values used when a field is unset
#[derive(Debug, Serialize, ToSchema)]
pub struct ConfigDefaults {
    pub global_provider: &'static str,
    pub planning_model: String,
    pub executor_model: String,
    pub tick_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub memory_depth: usize,
    pub chat_window: usize,
}

impl Default for ConfigDefaults {
    fn default() -> Self {
        let models = SwarmModels::default();
        let scheduler = SchedulerConfig::default();
        Self {
            global_provider: models.decomposer.provider.id(),
            planning_model: models.decomposer.model,
            executor_model: models.executor.model,
            tick_interval_ms: scheduler.tick_interval_ms,
            settle_delay_ms: scheduler.settle_delay_ms,
            max_attempts: scheduler.retry.max_attempts,
            backoff_ms: scheduler.retry.backoff_ms,
            memory_depth: scheduler.memory_depth,
            chat_window: scheduler.chat_window,
        }
    }
}
