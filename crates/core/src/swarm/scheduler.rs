//! # Swarm Scheduler
//!
//! Owns the active mission and drives every agent from queued to complete.
//!
//! ## Architecture
//!
//! ```text
//! SchedulerHandle ── Command ──────▶ ┌──────────────────────┐
//!        ▲                           │  scheduler task      │── tick ──▶ progress
//!        └──── oneshot reply ─────── │  (owns the Mission)  │
//!                                    └──────────────────────┘
//!   collaborator tasks ── Completion (tagged with epoch) ──▲
//! ```
//!
//! A single task handles commands, collaborator completions and the progress
//! tick, so mission state is never shared. Each mission carries an epoch and a
//! cancellation token; replacing or cancelling it cancels every call spawned
//! for it, and any completion from an older epoch is dropped.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::collaborators::{Collaborators, FollowUpContext};
use super::events::{SwarmEvent, SwarmEventKind};
use super::mission::{
    AgentOutput, AgentPlan, AgentStatus, ChatRole, ChatTurn, Mission, MissionPhase,
    MissionSnapshot,
};
use crate::error::{
    DecompositionError, ExecutionError, QueryError, SchedulerError, SynthesisError,
};
use crate::state::{MissionArchive, MissionRecord};

/// What happens to an agent whose retry budget is spent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedAction {
    /// Mark the agent failed
    #[default]
    Fail,
    /// Leave it working at 100% until someone retries it
    Stall,
}

/// Executor retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total executor calls per agent before giving up (minimum 1)
    pub max_attempts: u32,
    /// Base delay before the second attempt, doubled for each further one
    pub backoff_ms: u64,
    #[serde(default)]
    pub on_exhausted: ExhaustedAction,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
            on_exhausted: ExhaustedAction::Fail,
        }
    }
}

impl RetryPolicy {
    /// One attempt, then wait for a manual retry
    pub fn stall_on_failure() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            on_exhausted: ExhaustedAction::Stall,
        }
    }

    fn backoff_for(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << shift))
    }
}

/// Configuration for the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Progress tick period
    pub tick_interval_ms: u64,
    /// Smallest progress step per tick
    pub min_increment: u8,
    /// Largest progress step per tick
    pub max_increment: u8,
    /// Pause between a dependency completing and its dependents starting
    pub settle_delay_ms: u64,
    pub decomposer_timeout_secs: u64,
    pub executor_timeout_secs: u64,
    pub synthesis_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub retry: RetryPolicy,
    /// Archived missions passed to the decomposer
    pub memory_depth: usize,
    /// Chat turns passed to the follow-up responder
    pub chat_window: usize,
    /// Broadcast capacity for swarm events
    pub event_buffer: usize,
    /// Fixed seed for progress increments (random when unset)
    pub seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            min_increment: 1,
            max_increment: 3,
            settle_delay_ms: 800,
            decomposer_timeout_secs: 120,
            executor_timeout_secs: 120,
            synthesis_timeout_secs: 180,
            query_timeout_secs: 120,
            retry: RetryPolicy::default(),
            memory_depth: 5,
            chat_window: 12,
            event_buffer: 256,
            seed: None,
        }
    }
}

impl SchedulerConfig {
    fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    fn increment_range(&self) -> (u8, u8) {
        let low = self.min_increment.clamp(1, 100);
        let high = self.max_increment.clamp(low, 100);
        (low, high)
    }

    fn max_attempts(&self) -> u32 {
        self.retry.max_attempts.max(1)
    }
}

type Reply<T> = oneshot::Sender<Result<T, SchedulerError>>;

/// Requests from callers to the scheduler task
enum Command {
    Decompose {
        goal: String,
        reply: Reply<MissionSnapshot>,
    },
    Start {
        reply: Reply<MissionSnapshot>,
    },
    Block {
        agent_id: String,
        reply: Reply<()>,
    },
    Unblock {
        agent_id: String,
        reply: Reply<()>,
    },
    RetryAgent {
        agent_id: String,
        reply: Reply<()>,
    },
    RetrySynthesis {
        reply: Reply<()>,
    },
    Cancel {
        reply: Reply<()>,
    },
    Ask {
        question: String,
        reply: Reply<String>,
    },
    Snapshot {
        reply: oneshot::Sender<Option<MissionSnapshot>>,
    },
}

/// Results of collaborator calls, tagged with the epoch that issued them
enum Completion {
    Decomposed {
        epoch: u64,
        goal: String,
        outcome: Result<Vec<AgentPlan>, DecompositionError>,
        reply: Reply<MissionSnapshot>,
    },
    AgentFinished {
        epoch: u64,
        agent_id: String,
        outcome: Result<String, ExecutionError>,
    },
    Synthesized {
        epoch: u64,
        outcome: Result<String, SynthesisError>,
    },
    Answered {
        epoch: u64,
        question: String,
        outcome: Result<String, QueryError>,
        reply: Reply<String>,
    },
}

/// Cloneable front door to a running scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SwarmEvent>,
}

impl SchedulerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)?
    }

    /// Replace the active mission with a freshly decomposed one
    pub async fn decompose(&self, goal: &str) -> Result<MissionSnapshot, SchedulerError> {
        self.request(|reply| Command::Decompose {
            goal: goal.to_string(),
            reply,
        })
        .await
    }

    /// Release the root agents of a planned mission
    pub async fn start(&self) -> Result<MissionSnapshot, SchedulerError> {
        self.request(|reply| Command::Start { reply }).await
    }

    /// Decompose and start in one call
    pub async fn launch(&self, goal: &str) -> Result<MissionSnapshot, SchedulerError> {
        self.decompose(goal).await?;
        self.start().await
    }

    /// Pause a working agent for human approval
    pub async fn block_agent(&self, agent_id: &str) -> Result<(), SchedulerError> {
        self.request(|reply| Command::Block {
            agent_id: agent_id.to_string(),
            reply,
        })
        .await
    }

    /// Resume a blocked agent at the progress it had
    pub async fn unblock_agent(&self, agent_id: &str) -> Result<(), SchedulerError> {
        self.request(|reply| Command::Unblock {
            agent_id: agent_id.to_string(),
            reply,
        })
        .await
    }

    /// Re-dispatch a stalled or failed agent with a fresh retry budget
    pub async fn retry_agent(&self, agent_id: &str) -> Result<(), SchedulerError> {
        self.request(|reply| Command::RetryAgent {
            agent_id: agent_id.to_string(),
            reply,
        })
        .await
    }

    /// Run the synthesizer again after it failed
    pub async fn retry_synthesis(&self) -> Result<(), SchedulerError> {
        self.request(|reply| Command::RetrySynthesis { reply }).await
    }

    /// Abort the mission; no further collaborator calls are made for it
    pub async fn cancel(&self) -> Result<(), SchedulerError> {
        self.request(|reply| Command::Cancel { reply }).await
    }

    /// Ask a follow-up question about the finished mission
    pub async fn ask(&self, question: &str) -> Result<String, SchedulerError> {
        self.request(|reply| Command::Ask {
            question: question.to_string(),
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<Option<MissionSnapshot>, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply: tx })
            .await
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }
}

/// Newest archived missions, read off the actor thread
async fn recall(archive: Arc<dyn MissionArchive>, depth: usize) -> Vec<MissionRecord> {
    match tokio::task::spawn_blocking(move || archive.recent(depth)).await {
        Ok(Ok(records)) => records,
        Ok(Err(e)) => {
            tracing::warn!("Failed to read mission archive: {}", e);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Archive read task failed: {}", e);
            Vec::new()
        }
    }
}

async fn record(archive: Arc<dyn MissionArchive>, goal: String, report: String) {
    match tokio::task::spawn_blocking(move || archive.append(&goal, &report)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!("Failed to archive mission: {}", e),
        Err(e) => tracing::warn!("Archive write task failed: {}", e),
    }
}

/// Shared plumbing the mission logic uses to talk to the outside
struct Wiring {
    config: SchedulerConfig,
    collaborators: Collaborators,
    archive: Arc<dyn MissionArchive>,
    events: broadcast::Sender<SwarmEvent>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Wiring {
    fn emit(&self, event: SwarmEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn spawn_decomposition(
        &self,
        epoch: u64,
        goal: String,
        cancel: CancellationToken,
        reply: Reply<MissionSnapshot>,
    ) {
        let decomposer = Arc::clone(&self.collaborators.decomposer);
        let archive = Arc::clone(&self.archive);
        let depth = self.config.memory_depth;
        let completions = self.completions.clone();
        let limit = Duration::from_secs(self.config.decomposer_timeout_secs);

        tokio::spawn(async move {
            let past = recall(archive, depth).await;
            tracing::info!(epoch, memory = past.len(), "Decomposing goal");
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(DecompositionError::Superseded),
                result = tokio::time::timeout(limit, decomposer.decompose(&goal, &past)) => {
                    result.unwrap_or(Err(DecompositionError::Timeout(limit)))
                }
            };
            let _ = completions.send(Completion::Decomposed {
                epoch,
                goal,
                outcome,
                reply,
            });
        });
    }

    fn spawn_execution(&self, epoch: u64, plan: AgentPlan, goal: String, cancel: CancellationToken) {
        let executor = Arc::clone(&self.collaborators.executor);
        let completions = self.completions.clone();
        let limit = Duration::from_secs(self.config.executor_timeout_secs);

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                result = tokio::time::timeout(limit, executor.execute(&plan, &goal)) => {
                    result.unwrap_or(Err(ExecutionError::Timeout(limit)))
                }
            };
            let _ = completions.send(Completion::AgentFinished {
                epoch,
                agent_id: plan.id,
                outcome,
            });
        });
    }

    fn spawn_synthesis(
        &self,
        epoch: u64,
        goal: String,
        outputs: Vec<AgentOutput>,
        cancel: CancellationToken,
    ) {
        let synthesizer = Arc::clone(&self.collaborators.synthesizer);
        let archive = Arc::clone(&self.archive);
        let completions = self.completions.clone();
        let limit = Duration::from_secs(self.config.synthesis_timeout_secs);

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                result = tokio::time::timeout(limit, synthesizer.synthesize(&goal, &outputs)) => {
                    result.unwrap_or(Err(SynthesisError::Timeout(limit)))
                }
            };
            if cancel.is_cancelled() {
                return;
            }
            if let Ok(report) = &outcome {
                record(archive, goal, report.clone()).await;
            }
            let _ = completions.send(Completion::Synthesized { epoch, outcome });
        });
    }

    fn spawn_answer(
        &self,
        epoch: u64,
        context: FollowUpContext,
        cancel: CancellationToken,
        reply: Reply<String>,
    ) {
        let responder = Arc::clone(&self.collaborators.responder);
        let completions = self.completions.clone();
        let limit = Duration::from_secs(self.config.query_timeout_secs);

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(QueryError::Superseded),
                result = tokio::time::timeout(limit, responder.answer(&context)) => {
                    result.unwrap_or(Err(QueryError::Timeout(limit)))
                }
            };
            let _ = completions.send(Completion::Answered {
                epoch,
                question: context.question,
                outcome,
                reply,
            });
        });
    }
}

/// Per-agent bookkeeping that callers never see
#[derive(Debug, Clone, Copy, Default)]
struct AgentTrack {
    /// Executor call outstanding
    in_flight: bool,
    /// Dependency completed, start after this instant
    release_at: Option<Instant>,
    /// Failed attempt, re-dispatch after this instant
    retry_at: Option<Instant>,
}

/// The mission currently owned by the scheduler
struct ActiveMission {
    epoch: u64,
    mission: Mission,
    phase: MissionPhase,
    chat: Vec<ChatTurn>,
    cancel: CancellationToken,
    tracks: HashMap<String, AgentTrack>,
    synthesis_requested: bool,
    stall_reported: bool,
}

impl ActiveMission {
    fn new(mission: Mission, epoch: u64) -> Self {
        let tracks = mission
            .agents
            .iter()
            .map(|a| (a.id.clone(), AgentTrack::default()))
            .collect();
        Self {
            epoch,
            mission,
            phase: MissionPhase::Planned,
            chat: Vec::new(),
            cancel: CancellationToken::new(),
            tracks,
            synthesis_requested: false,
            stall_reported: false,
        }
    }

    fn snapshot(&self) -> MissionSnapshot {
        MissionSnapshot {
            mission: self.mission.clone(),
            phase: self.phase,
            chat: self.chat.clone(),
        }
    }

    fn event(&self, kind: SwarmEventKind) -> SwarmEvent {
        SwarmEvent::new(kind, &self.mission.id)
    }

    fn track(&self, agent_id: &str) -> AgentTrack {
        self.tracks.get(agent_id).copied().unwrap_or_default()
    }

    fn track_mut(&mut self, agent_id: &str) -> &mut AgentTrack {
        self.tracks.entry(agent_id.to_string()).or_default()
    }

    fn require_phase(&self, phase: MissionPhase, action: &'static str) -> Result<(), SchedulerError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(SchedulerError::InvalidPhase {
                phase: self.phase,
                action,
            })
        }
    }

    fn agent_status(&self, agent_id: &str) -> Result<AgentStatus, SchedulerError> {
        self.mission
            .agent(agent_id)
            .map(|a| a.status)
            .ok_or_else(|| SchedulerError::UnknownAgent(agent_id.to_string()))
    }

    fn start(&mut self, wiring: &Wiring) -> Result<(), SchedulerError> {
        self.require_phase(MissionPhase::Planned, "start")?;
        self.phase = MissionPhase::Running;

        tracing::info!(
            mission = %self.mission.id,
            agents = self.mission.agents.len(),
            "Mission started"
        );
        wiring.emit(
            self.event(SwarmEventKind::MissionStarted)
                .with_data(serde_json::json!({ "agents": self.mission.agents.len() })),
        );

        let roots: Vec<String> = self
            .mission
            .agents
            .iter()
            .filter(|a| a.is_root())
            .map(|a| a.id.clone())
            .collect();
        for id in roots {
            self.start_agent(&id, wiring);
        }
        Ok(())
    }

    fn start_agent(&mut self, agent_id: &str, wiring: &Wiring) {
        match self.mission.agent_mut(agent_id) {
            Some(agent) if agent.status == AgentStatus::Queued => {
                agent.status = AgentStatus::Working;
                agent.progress = 0;
            }
            _ => return,
        }
        self.track_mut(agent_id).release_at = None;

        tracing::debug!(agent = agent_id, "Agent started");
        wiring.emit(self.event(SwarmEventKind::AgentStarted).for_agent(agent_id));
    }

    fn on_tick(&mut self, wiring: &Wiring, rng: &mut StdRng, now: Instant) {
        if self.phase != MissionPhase::Running {
            return;
        }

        let (low, high) = wiring.config.increment_range();
        let ids: Vec<String> = self.mission.agents.iter().map(|a| a.id.clone()).collect();

        for id in ids {
            let track = self.track(&id);
            let Some(agent) = self.mission.agent_mut(&id) else {
                continue;
            };
            let status = agent.status;

            match status {
                AgentStatus::Queued => {
                    if track.release_at.is_some_and(|at| now >= at) {
                        self.start_agent(&id, wiring);
                    }
                }
                AgentStatus::Working if track.in_flight => {}
                AgentStatus::Working if agent.progress >= 100 => {
                    if track.retry_at.is_some_and(|at| now >= at) {
                        self.dispatch(&id, wiring);
                    }
                }
                AgentStatus::Working => {
                    let step = rng.gen_range(low..=high);
                    agent.progress = agent.progress.saturating_add(step).min(100);
                    let progress = agent.progress;

                    wiring.emit(
                        self.event(SwarmEventKind::AgentProgress)
                            .for_agent(&id)
                            .with_data(serde_json::json!({ "progress": progress })),
                    );

                    if progress >= 100 {
                        self.dispatch(&id, wiring);
                    }
                }
                AgentStatus::Blocked | AgentStatus::Complete | AgentStatus::Failed => {}
            }
        }

        self.check_stalled(wiring);
    }

    fn dispatch(&mut self, agent_id: &str, wiring: &Wiring) {
        let Some(agent) = self.mission.agent_mut(agent_id) else {
            return;
        };
        agent.attempts += 1;
        let attempt = agent.attempts;
        let plan = agent.plan();

        let track = self.track_mut(agent_id);
        track.in_flight = true;
        track.retry_at = None;

        tracing::debug!(agent = agent_id, attempt, "Dispatching executor");
        wiring.emit(
            self.event(SwarmEventKind::AgentDispatched)
                .for_agent(agent_id)
                .with_data(serde_json::json!({ "attempt": attempt })),
        );

        wiring.spawn_execution(
            self.epoch,
            plan,
            self.mission.goal.clone(),
            self.cancel.clone(),
        );
    }

    fn on_agent_finished(
        &mut self,
        agent_id: &str,
        outcome: Result<String, ExecutionError>,
        wiring: &Wiring,
        now: Instant,
    ) {
        if self.phase != MissionPhase::Running {
            tracing::debug!(agent = agent_id, phase = ?self.phase, "Ignoring late executor result");
            return;
        }
        self.track_mut(agent_id).in_flight = false;

        match outcome {
            Ok(result) => {
                match self.mission.agent_mut(agent_id) {
                    Some(agent) if agent.status == AgentStatus::Working => {
                        agent.status = AgentStatus::Complete;
                        agent.progress = 100;
                        agent.result = Some(result);
                        agent.last_error = None;
                    }
                    _ => return,
                }

                tracing::info!(agent = agent_id, "Agent complete");
                wiring.emit(self.event(SwarmEventKind::AgentCompleted).for_agent(agent_id));

                self.release_dependents(agent_id, wiring, now);
                self.maybe_synthesize(wiring);
            }
            Err(err) => {
                let max_attempts = wiring.config.max_attempts();
                let Some(agent) = self.mission.agent_mut(agent_id) else {
                    return;
                };
                agent.last_error = Some(err.to_string());
                let attempts = agent.attempts;
                let exhausted = attempts >= max_attempts;
                if exhausted && wiring.config.retry.on_exhausted == ExhaustedAction::Fail {
                    agent.status = AgentStatus::Failed;
                }

                tracing::warn!(agent = agent_id, attempts, "Executor failed: {}", err);
                wiring.emit(
                    self.event(SwarmEventKind::AgentFailed)
                        .for_agent(agent_id)
                        .with_data(serde_json::json!({
                            "attempt": attempts,
                            "error": err.to_string(),
                            "exhausted": exhausted,
                        })),
                );

                if !exhausted {
                    let delay = wiring.config.retry.backoff_for(attempts);
                    self.track_mut(agent_id).retry_at = Some(now + delay);
                    wiring.emit(
                        self.event(SwarmEventKind::AgentRetrying)
                            .for_agent(agent_id)
                            .with_data(serde_json::json!({
                                "next_attempt": attempts + 1,
                                "delay_ms": delay.as_millis() as u64,
                            })),
                    );
                }
            }
        }

        self.check_stalled(wiring);
    }

    /// O(n) walk: only agents naming `completed_id` are released
    fn release_dependents(&mut self, completed_id: &str, wiring: &Wiring, now: Instant) {
        let delay = wiring.config.settle_delay();
        for id in self.mission.dependents_of(completed_id) {
            let queued = self
                .mission
                .agent(&id)
                .is_some_and(|a| a.status == AgentStatus::Queued);
            if !queued {
                continue;
            }
            if delay.is_zero() {
                self.start_agent(&id, wiring);
            } else {
                self.track_mut(&id).release_at = Some(now + delay);
            }
        }
    }

    fn maybe_synthesize(&mut self, wiring: &Wiring) {
        if self.phase != MissionPhase::Running
            || self.synthesis_requested
            || !self.mission.all_complete()
        {
            return;
        }
        self.synthesis_requested = true;
        self.begin_synthesis(wiring);
    }

    fn begin_synthesis(&mut self, wiring: &Wiring) {
        self.phase = MissionPhase::Synthesizing;
        tracing::info!(mission = %self.mission.id, "All agents complete, synthesizing");
        wiring.emit(self.event(SwarmEventKind::SynthesisStarted));
        wiring.spawn_synthesis(
            self.epoch,
            self.mission.goal.clone(),
            self.mission.outputs(),
            self.cancel.clone(),
        );
    }

    fn on_synthesized(&mut self, outcome: Result<String, SynthesisError>, wiring: &Wiring) {
        if self.phase != MissionPhase::Synthesizing {
            return;
        }
        match outcome {
            Ok(report) => {
                self.mission.final_report = Some(report.clone());
                self.phase = MissionPhase::Complete;
                tracing::info!(mission = %self.mission.id, "Mission complete");
                wiring.emit(
                    self.event(SwarmEventKind::SynthesisCompleted)
                        .with_data(serde_json::json!({ "report_chars": report.len() })),
                );
            }
            Err(err) => {
                self.phase = MissionPhase::SynthesisFailed;
                tracing::warn!(mission = %self.mission.id, "Synthesis failed: {}", err);
                wiring.emit(
                    self.event(SwarmEventKind::SynthesisFailed)
                        .with_data(serde_json::json!({ "error": err.to_string() })),
                );
            }
        }
    }

    /// Report once when nothing can move without a human
    fn check_stalled(&mut self, wiring: &Wiring) {
        if self.phase != MissionPhase::Running || self.mission.all_complete() {
            return;
        }

        let movable = self.mission.agents.iter().any(|a| {
            let track = self.track(&a.id);
            match a.status {
                AgentStatus::Working => {
                    track.in_flight || track.retry_at.is_some() || a.progress < 100
                }
                AgentStatus::Queued => track.release_at.is_some(),
                _ => false,
            }
        });
        if movable || self.stall_reported {
            return;
        }
        self.stall_reported = true;

        let stuck: Vec<&str> = self
            .mission
            .agents
            .iter()
            .filter(|a| a.status != AgentStatus::Complete)
            .map(|a| a.id.as_str())
            .collect();
        tracing::warn!(mission = %self.mission.id, ?stuck, "Mission stalled");
        wiring.emit(
            self.event(SwarmEventKind::MissionStalled)
                .with_data(serde_json::json!({ "agents": stuck })),
        );
    }

    fn block(&mut self, agent_id: &str, wiring: &Wiring) -> Result<(), SchedulerError> {
        self.require_phase(MissionPhase::Running, "block an agent")?;
        let status = self.agent_status(agent_id)?;
        let track = self.track(agent_id);

        match self.mission.agent_mut(agent_id) {
            Some(agent)
                if status == AgentStatus::Working
                    && agent.progress < 100
                    && !track.in_flight
                    && track.retry_at.is_none() =>
            {
                agent.status = AgentStatus::Blocked;
            }
            _ => {
                return Err(SchedulerError::InvalidTransition {
                    agent_id: agent_id.to_string(),
                    status,
                    action: "block",
                })
            }
        }

        wiring.emit(self.event(SwarmEventKind::AgentBlocked).for_agent(agent_id));
        self.check_stalled(wiring);
        Ok(())
    }

    fn unblock(&mut self, agent_id: &str, wiring: &Wiring) -> Result<(), SchedulerError> {
        self.require_phase(MissionPhase::Running, "unblock an agent")?;
        let status = self.agent_status(agent_id)?;
        if status != AgentStatus::Blocked {
            return Err(SchedulerError::InvalidTransition {
                agent_id: agent_id.to_string(),
                status,
                action: "unblock",
            });
        }

        let mut progress = 0;
        if let Some(agent) = self.mission.agent_mut(agent_id) {
            agent.status = AgentStatus::Working;
            progress = agent.progress;
        }
        self.stall_reported = false;

        wiring.emit(
            self.event(SwarmEventKind::AgentUnblocked)
                .for_agent(agent_id)
                .with_data(serde_json::json!({ "progress": progress })),
        );
        Ok(())
    }

    fn retry_agent(&mut self, agent_id: &str, wiring: &Wiring) -> Result<(), SchedulerError> {
        self.require_phase(MissionPhase::Running, "retry an agent")?;
        let status = self.agent_status(agent_id)?;
        let track = self.track(agent_id);

        let retryable = match self.mission.agent(agent_id) {
            Some(agent) => match agent.status {
                AgentStatus::Failed => true,
                AgentStatus::Working => {
                    agent.progress >= 100
                        && agent.last_error.is_some()
                        && !track.in_flight
                        && track.retry_at.is_none()
                }
                _ => false,
            },
            None => false,
        };
        if !retryable {
            return Err(SchedulerError::InvalidTransition {
                agent_id: agent_id.to_string(),
                status,
                action: "retry",
            });
        }

        if let Some(agent) = self.mission.agent_mut(agent_id) {
            agent.status = AgentStatus::Working;
            agent.progress = 100;
            agent.attempts = 0;
        }
        self.stall_reported = false;
        tracing::info!(agent = agent_id, "Manual retry");
        self.dispatch(agent_id, wiring);
        Ok(())
    }

    fn retry_synthesis(&mut self, wiring: &Wiring) -> Result<(), SchedulerError> {
        if self.phase != MissionPhase::SynthesisFailed {
            return Err(SynthesisError::NotReady.into());
        }
        self.begin_synthesis(wiring);
        Ok(())
    }

    fn cancel(&mut self, wiring: &Wiring) -> Result<(), SchedulerError> {
        if matches!(self.phase, MissionPhase::Complete | MissionPhase::Aborted) {
            return Err(SchedulerError::InvalidPhase {
                phase: self.phase,
                action: "cancel",
            });
        }
        self.cancel.cancel();
        self.phase = MissionPhase::Aborted;
        for track in self.tracks.values_mut() {
            track.in_flight = false;
            track.release_at = None;
            track.retry_at = None;
        }

        tracing::info!(mission = %self.mission.id, "Mission aborted");
        wiring.emit(self.event(SwarmEventKind::MissionAborted));
        Ok(())
    }

    fn supersede(self, wiring: &Wiring) {
        self.cancel.cancel();
        tracing::info!(mission = %self.mission.id, "Mission superseded");
        wiring.emit(self.event(SwarmEventKind::MissionSuperseded));
    }

    fn ask(&mut self, question: String, wiring: &Wiring, reply: Reply<String>) {
        let question = question.trim().to_string();
        if question.is_empty() {
            let _ = reply.send(Err(QueryError::EmptyQuestion.into()));
            return;
        }
        let Some(report) = self.mission.final_report.clone() else {
            let _ = reply.send(Err(QueryError::NoReport.into()));
            return;
        };

        let start = self.chat.len().saturating_sub(wiring.config.chat_window);
        let context = FollowUpContext {
            goal: self.mission.goal.clone(),
            outputs: self.mission.outputs(),
            report,
            history: self.chat[start..].to_vec(),
            question,
        };
        wiring.spawn_answer(self.epoch, context, self.cancel.clone(), reply);
    }

    fn on_answered(
        &mut self,
        question: String,
        outcome: Result<String, QueryError>,
        wiring: &Wiring,
        reply: Reply<String>,
    ) {
        match outcome {
            Ok(answer) => {
                self.chat.push(ChatTurn::new(ChatRole::User, &question));
                self.chat.push(ChatTurn::new(ChatRole::Assistant, &answer));
                wiring.emit(
                    self.event(SwarmEventKind::FollowUpAnswered)
                        .with_data(serde_json::json!({ "turns": self.chat.len() })),
                );
                let _ = reply.send(Ok(answer));
            }
            Err(err) => {
                tracing::warn!(mission = %self.mission.id, "Follow-up failed: {}", err);
                wiring.emit(
                    self.event(SwarmEventKind::FollowUpFailed)
                        .with_data(serde_json::json!({ "error": err.to_string() })),
                );
                let _ = reply.send(Err(err.into()));
            }
        }
    }
}

/// The scheduler task. Create with [`SwarmScheduler::spawn`].
pub struct SwarmScheduler {
    wiring: Wiring,
    completions: mpsc::UnboundedReceiver<Completion>,
    rng: StdRng,
    epoch: u64,
    active: Option<ActiveMission>,
    /// Token of the decomposition currently in flight
    decomposing: Option<CancellationToken>,
}

impl SwarmScheduler {
    /// Spawn the scheduler on the current tokio runtime.
    ///
    /// The task stops when every [`SchedulerHandle`] has been dropped.
    pub fn spawn(
        collaborators: Collaborators,
        archive: Arc<dyn MissionArchive>,
        config: SchedulerConfig,
    ) -> SchedulerHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let scheduler = Self {
            wiring: Wiring {
                config,
                collaborators,
                archive,
                events: event_tx.clone(),
                completions: completion_tx,
            },
            completions: completion_rx,
            rng,
            epoch: 0,
            active: None,
            decomposing: None,
        };
        tokio::spawn(scheduler.run(command_rx));

        SchedulerHandle {
            commands: command_tx,
            events: event_tx,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(self.wiring.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(done) = self.completions.recv() => self.handle_completion(done),
                _ = ticker.tick() => self.on_tick(),
            }
        }

        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        if let Some(pending) = self.decomposing.take() {
            pending.cancel();
        }
        tracing::debug!("Scheduler stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Decompose { goal, reply } => self.decompose(goal, reply),
            Command::Start { reply } => {
                let result = self.with_active(|active, wiring| {
                    active.start(wiring)?;
                    Ok(active.snapshot())
                });
                let _ = reply.send(result);
            }
            Command::Block { agent_id, reply } => {
                let _ = reply.send(self.with_active(|a, w| a.block(&agent_id, w)));
            }
            Command::Unblock { agent_id, reply } => {
                let _ = reply.send(self.with_active(|a, w| a.unblock(&agent_id, w)));
            }
            Command::RetryAgent { agent_id, reply } => {
                let _ = reply.send(self.with_active(|a, w| a.retry_agent(&agent_id, w)));
            }
            Command::RetrySynthesis { reply } => {
                let _ = reply.send(self.with_active(|a, w| a.retry_synthesis(w)));
            }
            Command::Cancel { reply } => {
                let _ = reply.send(self.with_active(|a, w| a.cancel(w)));
            }
            Command::Ask { question, reply } => match self.active.as_mut() {
                Some(active) => active.ask(question, &self.wiring, reply),
                None => {
                    let _ = reply.send(Err(QueryError::NoReport.into()));
                }
            },
            Command::Snapshot { reply } => {
                let _ = reply.send(self.active.as_ref().map(ActiveMission::snapshot));
            }
        }
    }

    fn with_active<T>(
        &mut self,
        f: impl FnOnce(&mut ActiveMission, &Wiring) -> Result<T, SchedulerError>,
    ) -> Result<T, SchedulerError> {
        match self.active.as_mut() {
            Some(active) => f(active, &self.wiring),
            None => Err(SchedulerError::NoMission),
        }
    }

    #[tracing::instrument(skip(self, reply), fields(goal_preview = %goal.chars().take(50).collect::<String>()))]
    fn decompose(&mut self, goal: String, reply: Reply<MissionSnapshot>) {
        let goal = goal.trim().to_string();
        if goal.is_empty() {
            let _ = reply.send(Err(DecompositionError::EmptyGoal.into()));
            return;
        }

        self.epoch += 1;
        if let Some(previous) = self.active.take() {
            previous.supersede(&self.wiring);
        }
        if let Some(pending) = self.decomposing.take() {
            pending.cancel();
        }

        let cancel = CancellationToken::new();
        self.decomposing = Some(cancel.clone());
        self.wiring
            .spawn_decomposition(self.epoch, goal, cancel, reply);
    }

    fn handle_completion(&mut self, done: Completion) {
        let now = Instant::now();
        match done {
            Completion::Decomposed {
                epoch,
                goal,
                outcome,
                reply,
            } => self.on_decomposed(epoch, goal, outcome, reply),
            Completion::AgentFinished {
                epoch,
                agent_id,
                outcome,
            } => match self.active.as_mut() {
                Some(active) if active.epoch == epoch => {
                    active.on_agent_finished(&agent_id, outcome, &self.wiring, now)
                }
                _ => tracing::debug!(epoch, agent = %agent_id, "Discarding stale executor result"),
            },
            Completion::Synthesized { epoch, outcome } => match self.active.as_mut() {
                Some(active) if active.epoch == epoch => active.on_synthesized(outcome, &self.wiring),
                _ => tracing::debug!(epoch, "Discarding stale synthesis result"),
            },
            Completion::Answered {
                epoch,
                question,
                outcome,
                reply,
            } => match self.active.as_mut() {
                Some(active) if active.epoch == epoch => {
                    active.on_answered(question, outcome, &self.wiring, reply)
                }
                _ => {
                    let _ = reply.send(Err(QueryError::Superseded.into()));
                }
            },
        }
    }

    fn on_decomposed(
        &mut self,
        epoch: u64,
        goal: String,
        outcome: Result<Vec<AgentPlan>, DecompositionError>,
        reply: Reply<MissionSnapshot>,
    ) {
        if epoch != self.epoch {
            let _ = reply.send(Err(DecompositionError::Superseded.into()));
            return;
        }
        self.decomposing = None;

        match outcome.and_then(|plans| Mission::from_plans(&goal, plans)) {
            Ok(mission) => {
                let active = ActiveMission::new(mission, epoch);
                let count = active.mission.agents.len();
                if !(3..=5).contains(&count) {
                    tracing::warn!(agents = count, "Decomposer returned an unusual plan size");
                }
                tracing::info!(mission = %active.mission.id, agents = count, "Mission planned");
                self.wiring.emit(
                    active
                        .event(SwarmEventKind::MissionPlanned)
                        .with_data(serde_json::json!({
                            "goal": active.mission.goal,
                            "agents": count,
                        })),
                );
                let _ = reply.send(Ok(active.snapshot()));
                self.active = Some(active);
            }
            Err(err) => {
                tracing::warn!("Decomposition failed: {}", err);
                let _ = reply.send(Err(err.into()));
            }
        }
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        if let Some(active) = self.active.as_mut() {
            active.on_tick(&self.wiring, &mut self.rng, now);
        }
    }
}

#[cfg(test)]
mod tests;
