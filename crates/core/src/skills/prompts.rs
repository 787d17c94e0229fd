//! Default prompt templates bundled at compile time.
//!
//! These are used for seeding the database on first run.
//! At runtime, prompts are loaded from the database to allow customization.

/// Decomposer - splits a goal into agents
pub const DECOMPOSER: &str = "decomposer";

/// Executor - produces one agent's work product
pub const EXECUTOR: &str = "executor";

/// Synthesizer - merges agent outputs into the mission debrief
pub const SYNTHESIZER: &str = "synthesizer";

/// Responder - answers follow-up questions
pub const RESPONDER: &str = "responder";

const DECOMPOSER_DEFAULT: &str = include_str!("defaults/decomposer.md");
const EXECUTOR_DEFAULT: &str = include_str!("defaults/executor.md");
const SYNTHESIZER_DEFAULT: &str = include_str!("defaults/synthesizer.md");
const RESPONDER_DEFAULT: &str = include_str!("defaults/responder.md");

/// Bundled text for a slug
pub fn default_for(slug: &str) -> Option<&'static str> {
    match slug {
        DECOMPOSER => Some(DECOMPOSER_DEFAULT),
        EXECUTOR => Some(EXECUTOR_DEFAULT),
        SYNTHESIZER => Some(SYNTHESIZER_DEFAULT),
        RESPONDER => Some(RESPONDER_DEFAULT),
        _ => None,
    }
}

/// All default prompts with their slugs for seeding
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        (DECOMPOSER, DECOMPOSER_DEFAULT),
        (EXECUTOR, EXECUTOR_DEFAULT),
        (SYNTHESIZER, SYNTHESIZER_DEFAULT),
        (RESPONDER, RESPONDER_DEFAULT),
    ]
}
