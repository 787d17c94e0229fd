//! # Nexus Core
//!
//! Agent swarm orchestration: a goal is decomposed into a handful of
//! dependent agents, each agent's work is produced by an LLM, and the
//! results are synthesized into a report that can be questioned afterwards.
//!
//! ## Architecture
//!
//! - `swarm/` - Mission model, scheduler task and collaborator traits
//! - `skills/` - LLM-backed collaborators (radkit structured output)
//! - `models` - Per-role LLM provider configuration
//! - `state/` - SQLite database, mission archive, prompt templates
//! - `error` - Typed errors for every collaborator and command
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nexus_core::models::SwarmModels;
//! use nexus_core::skills::LlmSwarm;
//! use nexus_core::state::InMemoryArchive;
//! use nexus_core::swarm::{Collaborators, SchedulerConfig, SwarmScheduler};
//!
//! let swarm = Arc::new(LlmSwarm::new(SwarmModels::default()));
//! let handle = SwarmScheduler::spawn(
//!     Collaborators::uniform(swarm),
//!     Arc::new(InMemoryArchive::new()),
//!     SchedulerConfig::default(),
//! );
//! handle.launch("Research quantum computing").await?;
//! ```

pub mod error;
pub mod models;
pub mod skills;
pub mod state;
pub mod swarm;
