//! Nexus Server
//!
//! Axum API over the swarm scheduler, plus a `run` subcommand that drives a
//! single mission from the terminal without starting the server.

mod api;
mod config;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::{Parser, Subcommand};
use nexus_core::models::LlmProvider;
use nexus_core::skills::LlmSwarm;
use nexus_core::state::{ArchiveManager, InMemoryArchive, MissionArchive, NexusDb};
use nexus_core::swarm::{
    AgentStatus, Collaborators, MissionPhase, MissionSnapshot, SchedulerHandle, SwarmEvent,
    SwarmEventKind, SwarmScheduler,
};
use serde::Serialize;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{net::TcpListener, sync::broadcast::error::RecvError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::{OpenApi, ToSchema};

use config::{ConfigDefaults, PersistedConfig, CONFIG_PATH};

/// Application state
struct AppState {
    scheduler: SchedulerHandle,
    archive: Arc<dyn MissionArchive>,
    db: Arc<NexusDb>,
    config_path: PathBuf,
}

type SharedState = Arc<AppState>;

#[derive(Parser, Clone)]
#[command(author, version, about = "Nexus - Agent Swarm Orchestrator")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Nexus server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run one mission in the terminal (no server)
    Run {
        /// The goal to accomplish
        goal: String,
        /// Keep the archive in memory instead of .nexus/nexus.db
        #[arg(long)]
        ephemeral: bool,
    },
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("nexus_core=debug,nexus_server=debug")
        } else {
            EnvFilter::new("nexus_core=info,nexus_server=info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

/// API keys live in `.nexus/.env`; a project `.env` fills the gaps
fn load_env() {
    for path in [".nexus/.env", ".env"] {
        if dotenvy::from_path(path).is_ok() {
            tracing::debug!("Loaded environment from {}", path);
        }
    }
}

/// Open storage and spawn the scheduler task
fn build_state(
    ephemeral: bool,
    persisted: &PersistedConfig,
    config_path: PathBuf,
) -> anyhow::Result<SharedState> {
    let (db, archive): (Arc<NexusDb>, Arc<dyn MissionArchive>) = if ephemeral {
        (
            Arc::new(NexusDb::open_in_memory()?),
            Arc::new(InMemoryArchive::new()),
        )
    } else {
        let db = Arc::new(NexusDb::open()?);
        let archive = Arc::new(ArchiveManager::new(&db));
        (db, archive)
    };

    if let Err(e) = db.seed_prompts() {
        tracing::warn!("Failed to seed prompts: {:#}", e);
    }

    let models = persisted.swarm_models();
    tracing::info!(
        decomposer = %models.decomposer.model,
        executor = %models.executor.model,
        "Using {}",
        models.decomposer.provider.display_name()
    );

    let swarm = Arc::new(LlmSwarm::new(models).with_prompt_store(db.clone()));
    let scheduler = SwarmScheduler::spawn(
        Collaborators::uniform(swarm),
        archive.clone(),
        persisted.scheduler_config(),
    );

    Ok(Arc::new(AppState {
        scheduler,
        archive,
        db,
        config_path,
    }))
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Nexus API",
        version = "1.0.0",
        description = "API for the Nexus agent swarm orchestrator"
    ),
    paths(
        api::swarm::decompose,
        api::swarm::start,
        api::swarm::launch,
        api::swarm::status,
        api::swarm::block_agent,
        api::swarm::unblock_agent,
        api::swarm::retry_agent,
        api::swarm::retry_synthesis,
        api::swarm::cancel,
        api::swarm::ask,
        api::archive::list_archive,
        api::archive::delete_record,
        api::prompts::list_prompts,
        api::prompts::get_prompt,
        api::prompts::update_prompt,
        get_config,
        update_config,
        get_providers
    ),
    components(schemas(
        api::ApiResponse,
        api::ErrorResponse,
        api::MissionView,
        api::AgentView,
        api::ChatTurnView,
        api::StatusResponse,
        api::swarm::GoalRequest,
        api::swarm::AskRequest,
        api::swarm::AskResponse,
        api::archive::ArchiveEntry,
        api::archive::ArchiveListResponse,
        api::prompts::PromptListItem,
        api::prompts::PromptListResponse,
        api::prompts::PromptResponse,
        api::prompts::UpdatePromptRequest,
        api::prompts::UpdatePromptResponse,
        PersistedConfig,
        ConfigResponse,
        ConfigDefaults,
        ProviderInfo,
        ProvidersResponse
    )),
    tags(
        (name = "swarm", description = "Mission lifecycle and follow-up chat"),
        (name = "archive", description = "Completed missions"),
        (name = "prompts", description = "Prompt template management"),
        (name = "config", description = "Configuration management"),
        (name = "providers", description = "LLM provider discovery")
    )
)]
struct ApiDoc;

async fn serve_openapi() -> Response {
    match ApiDoc::openapi().to_json() {
        Ok(spec) => ([(header::CONTENT_TYPE, "application/json")], Body::from(spec)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// === Config Handlers ===

#[derive(Debug, Serialize, ToSchema)]
struct ConfigResponse {
    config: PersistedConfig,
    defaults: ConfigDefaults,
    /// Scheduler and model changes take effect on restart
    restart_required: bool,
}

/// Get current configuration
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "config",
    responses(
        (status = 200, description = "Current configuration and defaults", body = ConfigResponse)
    )
)]
async fn get_config(State(state): State<SharedState>) -> Json<ConfigResponse> {
    let config = PersistedConfig::load_from(&state.config_path).await;
    Json(ConfigResponse {
        config,
        defaults: ConfigDefaults::default(),
        restart_required: false,
    })
}

/// Update configuration (partial merge)
#[utoipa::path(
    patch,
    path = "/api/v1/config",
    tag = "config",
    request_body = PersistedConfig,
    responses(
        (status = 200, description = "Updated configuration", body = ConfigResponse),
        (status = 500, description = "Config file could not be written", body = api::ErrorResponse)
    )
)]
async fn update_config(
    State(state): State<SharedState>,
    Json(updates): Json<PersistedConfig>,
) -> Result<Json<ConfigResponse>, api::ApiError> {
    let mut config = PersistedConfig::load_from(&state.config_path).await;
    let before = config.clone();
    config.merge(updates);

    config
        .save_to(&state.config_path)
        .await
        .map_err(|e| api::ApiError::Internal(format!("Failed to save config: {}", e)))?;

    Ok(Json(ConfigResponse {
        restart_required: config != before,
        config,
        defaults: ConfigDefaults::default(),
    }))
}

#[derive(Debug, Serialize, ToSchema)]
struct ProviderInfo {
    id: String,
    name: String,
    default_model: String,
    supports_base_url: bool,
    env_var: String,
    /// Whether the key is present in the environment
    configured: bool,
}

#[derive(Debug, Serialize, ToSchema)]
struct ProvidersResponse {
    providers: Vec<ProviderInfo>,
}

fn provider_info() -> Vec<ProviderInfo> {
    LlmProvider::all()
        .into_iter()
        .map(|p| ProviderInfo {
            id: p.id().to_string(),
            name: p.display_name().to_string(),
            default_model: p.default_model().to_string(),
            supports_base_url: p.supports_base_url(),
            env_var: p.env_var().to_string(),
            configured: std::env::var(p.env_var()).is_ok(),
        })
        .collect()
}

/// Get available LLM providers
#[utoipa::path(
    get,
    path = "/api/v1/providers",
    tag = "providers",
    responses(
        (status = 200, description = "List of supported LLM providers", body = ProvidersResponse)
    )
)]
async fn get_providers() -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: provider_info(),
    })
}

// === Server Entry ===

fn router(state: SharedState) -> Router {
    Router::new()
        .nest("/api/v1/swarm", api::swarm::routes())
        .nest("/api/v1/archive", api::archive::routes())
        .nest("/api/v1/prompts", api::prompts::routes())
        .route("/api/v1/config", get(get_config).patch(update_config))
        .route("/api/v1/providers", get(get_providers))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state)
}

async fn run_server(port: u16) -> anyhow::Result<()> {
    let config_path = PathBuf::from(CONFIG_PATH);
    let persisted = PersistedConfig::load_from(&config_path).await;
    let state = build_state(false, &persisted, config_path)?;

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Nexus server running at http://{}", addr);
    tracing::info!("Swarm:   /api/v1/swarm/launch, /status, /events, /ask");
    tracing::info!("Archive: /api/v1/archive");
    tracing::info!("Config:  /api/v1/config (GET, PATCH)");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

// === CLI Mode ===

/// One terminal line per interesting event
fn describe_event(event: &SwarmEvent) -> Option<String> {
    let agent = event.agent_id.as_deref().unwrap_or("?");
    let field = |key: &str| {
        event
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    };

    let line = match event.kind {
        SwarmEventKind::MissionPlanned => format!("Planned {} agents", field("agents")),
        SwarmEventKind::MissionStarted => "Mission started".to_string(),
        SwarmEventKind::AgentStarted => format!("[{}] working", agent),
        SwarmEventKind::AgentDispatched => {
            format!("[{}] calling executor (attempt {})", agent, field("attempt"))
        }
        SwarmEventKind::AgentCompleted => format!("[{}] complete", agent),
        SwarmEventKind::AgentFailed => format!("[{}] failed: {}", agent, field("error")),
        SwarmEventKind::AgentRetrying => {
            format!("[{}] retrying in {}ms", agent, field("delay_ms"))
        }
        SwarmEventKind::SynthesisStarted => "Synthesizing report".to_string(),
        SwarmEventKind::SynthesisCompleted => "Report ready".to_string(),
        SwarmEventKind::SynthesisFailed => format!("Synthesis failed: {}", field("error")),
        SwarmEventKind::MissionStalled => format!("Mission stalled on {}", field("agents")),
        SwarmEventKind::MissionAborted => "Mission aborted".to_string(),
        _ => return None,
    };
    Some(line)
}

fn is_terminal(kind: SwarmEventKind) -> bool {
    matches!(
        kind,
        SwarmEventKind::SynthesisCompleted
            | SwarmEventKind::SynthesisFailed
            | SwarmEventKind::MissionStalled
            | SwarmEventKind::MissionAborted
    )
}

/// Terminal outcome read from a snapshot, for when its event was skipped
fn settled_outcome(snapshot: &MissionSnapshot) -> Option<SwarmEventKind> {
    match snapshot.phase {
        MissionPhase::Complete => Some(SwarmEventKind::SynthesisCompleted),
        MissionPhase::SynthesisFailed => Some(SwarmEventKind::SynthesisFailed),
        MissionPhase::Aborted => Some(SwarmEventKind::MissionAborted),
        MissionPhase::Running => {
            let agents = &snapshot.mission.agents;
            let ready = |dep: &Option<String>| match dep {
                None => true,
                Some(dep) => agents
                    .iter()
                    .any(|a| &a.id == dep && a.status == AgentStatus::Complete),
            };
            let failed = agents.iter().any(|a| a.status == AgentStatus::Failed);
            let moving = agents.iter().any(|a| match a.status {
                AgentStatus::Working => true,
                AgentStatus::Queued => ready(&a.dependency_id),
                _ => false,
            });
            (failed && !moving).then_some(SwarmEventKind::MissionStalled)
        }
        _ => None,
    }
}

async fn run_cli(goal: &str, ephemeral: bool) -> anyhow::Result<()> {
    let persisted = PersistedConfig::load_from(&PathBuf::from(CONFIG_PATH)).await;
    let state = build_state(ephemeral, &persisted, PathBuf::from(CONFIG_PATH))?;
    let scheduler = &state.scheduler;

    let mut rx = scheduler.subscribe();
    println!("Goal: {}", goal);
    let snapshot = scheduler.launch(goal).await?;
    for agent in &snapshot.mission.agents {
        match &agent.dependency_id {
            Some(dep) => println!("  {} {} ({}) after {}", agent.id, agent.name, agent.role, dep),
            None => println!("  {} {} ({})", agent.id, agent.name, agent.role),
        }
    }

    let last = loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(event) => {
                    if let Some(line) = describe_event(&event) {
                        println!("{}", line);
                    }
                    if is_terminal(event.kind) {
                        break event.kind;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} events", skipped);
                    let settled = scheduler.snapshot().await?.as_ref().and_then(settled_outcome);
                    if let Some(kind) = settled {
                        break kind;
                    }
                }
                Err(RecvError::Closed) => anyhow::bail!("Scheduler stopped unexpectedly"),
            },
            _ = tokio::signal::ctrl_c() => {
                scheduler.cancel().await?;
                anyhow::bail!("Interrupted");
            }
        }
    };

    if last != SwarmEventKind::SynthesisCompleted {
        anyhow::bail!("Mission did not complete");
    }

    let report = scheduler
        .snapshot()
        .await?
        .and_then(|s| s.mission.final_report)
        .unwrap_or_default();
    println!("\n{}", report);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    load_env();

    match args.command {
        Some(CliCommand::Run { goal, ephemeral }) => run_cli(&goal, ephemeral).await,
        Some(CliCommand::Serve { port }) => run_server(port).await,
        None => run_server(8080).await,
    }
}
