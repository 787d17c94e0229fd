use super::*;
use crate::state::InMemoryArchive;
use crate::swarm::collaborators::{AgentExecutor, Decomposer, FollowUpResponder, Synthesizer};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Collaborator backend driven entirely by its script
struct ScriptedBackend {
    plans: Vec<AgentPlan>,
    decompose_error: Option<DecompositionError>,
    /// Error returned for one goal only
    rejected_goal: Option<(String, DecompositionError)>,
    decompose_gate: Option<(String, Arc<Notify>)>,
    /// Remaining failures per agent id
    failures: Mutex<HashMap<String, u32>>,
    /// Goals whose executor calls never return
    hanging_goals: Mutex<HashSet<String>>,
    synthesis_failures: AtomicU32,
    executions: Mutex<Vec<String>>,
    seen_memory: Mutex<Vec<Vec<MissionRecord>>>,
    seen_history: Mutex<Vec<Vec<ChatTurn>>>,
}

impl ScriptedBackend {
    fn new(plans: Vec<AgentPlan>) -> Self {
        Self {
            plans,
            decompose_error: None,
            rejected_goal: None,
            decompose_gate: None,
            failures: Mutex::new(HashMap::new()),
            hanging_goals: Mutex::new(HashSet::new()),
            synthesis_failures: AtomicU32::new(0),
            executions: Mutex::new(Vec::new()),
            seen_memory: Mutex::new(Vec::new()),
            seen_history: Mutex::new(Vec::new()),
        }
    }

    fn failing(self, agent_id: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(agent_id.to_string(), times);
        self
    }

    fn rejecting(mut self, goal: &str, err: DecompositionError) -> Self {
        self.rejected_goal = Some((goal.to_string(), err));
        self
    }

    fn hanging(self, goal: &str) -> Self {
        self.hanging_goals.lock().unwrap().insert(goal.to_string());
        self
    }

    fn failing_synthesis(self, times: u32) -> Self {
        self.synthesis_failures.store(times, Ordering::SeqCst);
        self
    }

    fn heal(&self, agent_id: &str) {
        self.failures.lock().unwrap().remove(agent_id);
    }

    fn executions_of(&self, agent_id: &str) -> usize {
        self.executions
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == agent_id)
            .count()
    }
}

#[async_trait]
impl Decomposer for ScriptedBackend {
    async fn decompose(
        &self,
        goal: &str,
        past_missions: &[MissionRecord],
    ) -> Result<Vec<AgentPlan>, DecompositionError> {
        self.seen_memory.lock().unwrap().push(past_missions.to_vec());
        if let Some((gated_goal, gate)) = &self.decompose_gate {
            if gated_goal == goal {
                gate.notified().await;
            }
        }
        if let Some((rejected, err)) = &self.rejected_goal {
            if rejected == goal {
                return Err(err.clone());
            }
        }
        match &self.decompose_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.plans.clone()),
        }
    }
}

#[async_trait]
impl AgentExecutor for ScriptedBackend {
    async fn execute(&self, agent: &AgentPlan, goal: &str) -> Result<String, ExecutionError> {
        self.executions.lock().unwrap().push(agent.id.clone());

        let hang = self.hanging_goals.lock().unwrap().contains(goal);
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&agent.id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if fail {
            return Err(ExecutionError::Provider("scripted failure".to_string()));
        }
        Ok(format!("{} finished work on {}", agent.name, goal))
    }
}

#[async_trait]
impl Synthesizer for ScriptedBackend {
    async fn synthesize(
        &self,
        goal: &str,
        outputs: &[AgentOutput],
    ) -> Result<String, SynthesisError> {
        let pending = self.synthesis_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.synthesis_failures.store(pending - 1, Ordering::SeqCst);
            return Err(SynthesisError::Provider("scripted failure".to_string()));
        }
        let names: Vec<&str> = outputs.iter().map(|o| o.name.as_str()).collect();
        Ok(format!("Report for {}: {}", goal, names.join(", ")))
    }
}

#[async_trait]
impl FollowUpResponder for ScriptedBackend {
    async fn answer(&self, context: &FollowUpContext) -> Result<String, QueryError> {
        self.seen_history
            .lock()
            .unwrap()
            .push(context.history.clone());
        Ok(format!("Answer to: {}", context.question))
    }
}

/// Records events with the (virtual) instant they arrived
struct Recorder {
    rx: broadcast::Receiver<SwarmEvent>,
    seen: Vec<(Instant, SwarmEvent)>,
}

impl Recorder {
    fn new(handle: &SchedulerHandle) -> Self {
        Self {
            rx: handle.subscribe(),
            seen: Vec::new(),
        }
    }

    async fn until(&mut self, pred: impl Fn(&SwarmEvent) -> bool) -> SwarmEvent {
        let wait = async {
            loop {
                match self.rx.recv().await {
                    Ok(event) => {
                        self.seen.push((Instant::now(), event.clone()));
                        if pred(&event) {
                            return event;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event stream closed: {}", e),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(600), wait)
            .await
            .expect("timed out waiting for event")
    }

    async fn until_kind(&mut self, kind: SwarmEventKind) -> SwarmEvent {
        self.until(|e| e.kind == kind).await
    }

    async fn until_agent(&mut self, kind: SwarmEventKind, agent_id: &str) -> SwarmEvent {
        self.until(|e| e.is_agent(kind, agent_id)).await
    }

    fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.seen.push((Instant::now(), event));
        }
    }

    fn index_of(&self, kind: SwarmEventKind, agent_id: &str) -> Option<usize> {
        self.seen.iter().position(|(_, e)| e.is_agent(kind, agent_id))
    }

    fn instant_of(&self, kind: SwarmEventKind, agent_id: &str) -> Option<Instant> {
        self.seen
            .iter()
            .find(|(_, e)| e.is_agent(kind, agent_id))
            .map(|(at, _)| *at)
    }

    fn count(&self, kind: SwarmEventKind) -> usize {
        self.seen.iter().filter(|(_, e)| e.kind == kind).count()
    }
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_ms: 50,
        min_increment: 20,
        max_increment: 40,
        settle_delay_ms: 800,
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_ms: 100,
            on_exhausted: ExhaustedAction::Fail,
        },
        event_buffer: 1024,
        seed: Some(7),
        ..SchedulerConfig::default()
    }
}

fn chain() -> Vec<AgentPlan> {
    vec![
        AgentPlan::new("A1", "Researcher", "Gathers sources"),
        AgentPlan::new("A2", "Analyst", "Compares findings").after("A1"),
        AgentPlan::new("A3", "Writer", "Drafts the summary").after("A2"),
    ]
}

fn fan_out() -> Vec<AgentPlan> {
    vec![
        AgentPlan::new("A1", "Market Scout", "Sizes the market"),
        AgentPlan::new("A2", "Tech Scout", "Surveys the tooling"),
        AgentPlan::new("A3", "Strategist", "Builds the go-to-market").after("A1"),
    ]
}

fn two_branches() -> Vec<AgentPlan> {
    vec![
        AgentPlan::new("R1", "Field Researcher", "Interviews users"),
        AgentPlan::new("R2", "Data Analyst", "Pulls usage data"),
        AgentPlan::new("D1", "Designer", "Sketches flows from interviews").after("R1"),
        AgentPlan::new("D2", "Modeler", "Forecasts from usage").after("R2"),
    ]
}

/// Archive whose reads wait until the test releases them
struct GatedArchive {
    inner: InMemoryArchive,
    entered: Arc<Notify>,
    release: Mutex<std::sync::mpsc::Receiver<()>>,
}

impl MissionArchive for GatedArchive {
    fn append(&self, goal: &str, report: &str) -> anyhow::Result<MissionRecord> {
        self.inner.append(goal, report)
    }

    fn recent(&self, limit: usize) -> anyhow::Result<Vec<MissionRecord>> {
        self.entered.notify_one();
        let _ = self.release.lock().unwrap().recv();
        self.inner.recent(limit)
    }

    fn delete(&self, id: &str) -> anyhow::Result<bool> {
        self.inner.delete(id)
    }
}

fn spawn_with(
    backend: Arc<ScriptedBackend>,
    config: SchedulerConfig,
) -> (SchedulerHandle, Arc<InMemoryArchive>) {
    let archive = Arc::new(InMemoryArchive::new());
    let handle = SwarmScheduler::spawn(
        Collaborators::uniform(backend),
        archive.clone(),
        config,
    );
    (handle, archive)
}

async fn snapshot(handle: &SchedulerHandle) -> MissionSnapshot {
    handle
        .snapshot()
        .await
        .unwrap()
        .expect("expected an active mission")
}

#[tokio::test(start_paused = true)]
async fn test_chain_runs_in_dependency_order() {
    let backend = Arc::new(ScriptedBackend::new(chain()));
    let (handle, archive) = spawn_with(backend.clone(), test_config());
    let mut events = Recorder::new(&handle);

    let planned = handle.launch("Research quantum computing").await.unwrap();
    assert_eq!(planned.phase, MissionPhase::Running);
    assert_eq!(planned.agent("A1").unwrap().status, AgentStatus::Working);
    assert_eq!(planned.agent("A2").unwrap().status, AgentStatus::Queued);

    events.until_kind(SwarmEventKind::SynthesisCompleted).await;

    let a1_done = events.index_of(SwarmEventKind::AgentCompleted, "A1").unwrap();
    let a2_start = events.index_of(SwarmEventKind::AgentStarted, "A2").unwrap();
    let a2_done = events.index_of(SwarmEventKind::AgentCompleted, "A2").unwrap();
    let a3_start = events.index_of(SwarmEventKind::AgentStarted, "A3").unwrap();
    assert!(a1_done < a2_start);
    assert!(a2_done < a3_start);

    let settle = events.instant_of(SwarmEventKind::AgentStarted, "A2").unwrap()
        - events.instant_of(SwarmEventKind::AgentCompleted, "A1").unwrap();
    assert!(settle >= Duration::from_millis(800), "settled after {:?}", settle);

    let snap = snapshot(&handle).await;
    assert_eq!(snap.phase, MissionPhase::Complete);
    assert!(snap.mission.agents.iter().all(|a| a.status == AgentStatus::Complete));
    assert!(snap.mission.agents.iter().all(|a| a.result.is_some()));
    assert_eq!(
        snap.mission.final_report.as_deref(),
        Some("Report for Research quantum computing: Researcher, Analyst, Writer")
    );

    let records = archive.recent(10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].goal, "Research quantum computing");
    assert_eq!(backend.executions.lock().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_independent_roots_start_together() {
    let backend = Arc::new(ScriptedBackend::new(fan_out()));
    let (handle, _archive) = spawn_with(backend, test_config());
    let mut events = Recorder::new(&handle);

    handle.launch("Plan a product launch").await.unwrap();
    events.until_kind(SwarmEventKind::SynthesisCompleted).await;

    let a1 = events.instant_of(SwarmEventKind::AgentStarted, "A1").unwrap();
    let a2 = events.instant_of(SwarmEventKind::AgentStarted, "A2").unwrap();
    assert_eq!(a1, a2);

    let a1_done = events.index_of(SwarmEventKind::AgentCompleted, "A1").unwrap();
    let a3_start = events.index_of(SwarmEventKind::AgentStarted, "A3").unwrap();
    assert!(a1_done < a3_start);
}

#[tokio::test(start_paused = true)]
async fn test_each_dependent_follows_its_own_root() {
    let backend = Arc::new(ScriptedBackend::new(two_branches()));
    let (handle, _archive) = spawn_with(backend, test_config());
    let mut events = Recorder::new(&handle);

    handle.launch("Redesign onboarding").await.unwrap();
    events.until_kind(SwarmEventKind::SynthesisCompleted).await;

    for (root, dependent) in [("R1", "D1"), ("R2", "D2")] {
        let root_done = events.instant_of(SwarmEventKind::AgentCompleted, root).unwrap();
        let started = events.instant_of(SwarmEventKind::AgentStarted, dependent).unwrap();
        assert!(
            started - root_done >= Duration::from_millis(800),
            "{} started {:?} after {}",
            dependent,
            started - root_done,
            root
        );
        assert!(
            events.index_of(SwarmEventKind::AgentCompleted, root).unwrap()
                < events.index_of(SwarmEventKind::AgentStarted, dependent).unwrap()
        );
    }
    assert_eq!(events.count(SwarmEventKind::SynthesisStarted), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_branch_does_not_hold_back_sibling() {
    let backend = Arc::new(ScriptedBackend::new(two_branches()).failing("R1", u32::MAX));
    let (handle, archive) = spawn_with(backend.clone(), test_config());
    let mut events = Recorder::new(&handle);

    handle.launch("Redesign onboarding").await.unwrap();
    let stalled = events.until_kind(SwarmEventKind::MissionStalled).await;
    assert_eq!(stalled.data.unwrap()["agents"], serde_json::json!(["R1", "D1"]));

    tokio::time::sleep(Duration::from_secs(10)).await;
    events.drain();

    let snap = snapshot(&handle).await;
    assert_eq!(snap.phase, MissionPhase::Running);
    assert_eq!(snap.agent("R1").unwrap().status, AgentStatus::Failed);
    assert_eq!(snap.agent("R2").unwrap().status, AgentStatus::Complete);
    assert_eq!(snap.agent("D1").unwrap().status, AgentStatus::Queued);
    assert_eq!(snap.agent("D2").unwrap().status, AgentStatus::Complete);
    assert!(snap.agent("D2").unwrap().result.is_some());

    assert_eq!(events.index_of(SwarmEventKind::AgentStarted, "D1"), None);
    assert_eq!(backend.executions_of("D1"), 0);
    assert_eq!(events.count(SwarmEventKind::SynthesisStarted), 0);
    assert!(archive.recent(10).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_completions_synthesize_once() {
    let plans = vec![
        AgentPlan::new("A1", "Historian", "Covers the past"),
        AgentPlan::new("A2", "Economist", "Covers the costs"),
        AgentPlan::new("A3", "Engineer", "Covers the build"),
    ];
    let backend = Arc::new(ScriptedBackend::new(plans));
    let config = SchedulerConfig {
        min_increment: 25,
        max_increment: 25,
        settle_delay_ms: 0,
        ..test_config()
    };
    let (handle, archive) = spawn_with(backend.clone(), config);
    let mut events = Recorder::new(&handle);

    handle.launch("Assess the canal project").await.unwrap();
    events.until_kind(SwarmEventKind::SynthesisCompleted).await;

    let finished: Vec<Instant> = ["A1", "A2", "A3"]
        .iter()
        .map(|id| events.instant_of(SwarmEventKind::AgentCompleted, id).unwrap())
        .collect();
    assert!(finished.windows(2).all(|w| w[0] == w[1]));

    tokio::time::sleep(Duration::from_secs(5)).await;
    events.drain();
    assert_eq!(events.count(SwarmEventKind::SynthesisStarted), 1);
    assert_eq!(events.count(SwarmEventKind::SynthesisCompleted), 1);
    assert_eq!(archive.recent(10).unwrap().len(), 1);
    assert_eq!(backend.executions.lock().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic_and_capped() {
    let backend = Arc::new(ScriptedBackend::new(chain()));
    let (handle, _archive) = spawn_with(backend, test_config());
    let mut events = Recorder::new(&handle);

    handle.launch("Map the coastline").await.unwrap();
    events.until_agent(SwarmEventKind::AgentCompleted, "A1").await;

    let progress: Vec<u64> = events
        .seen
        .iter()
        .filter(|(_, e)| e.is_agent(SwarmEventKind::AgentProgress, "A1"))
        .filter_map(|(_, e)| e.data.as_ref()?.get("progress")?.as_u64())
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100));
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_after_transient_failures() {
    let backend = Arc::new(ScriptedBackend::new(chain()).failing("A1", 2));
    let (handle, _archive) = spawn_with(backend.clone(), test_config());
    let mut events = Recorder::new(&handle);

    handle.launch("Survey battery chemistry").await.unwrap();
    events.until_kind(SwarmEventKind::SynthesisCompleted).await;

    assert_eq!(backend.executions_of("A1"), 3);
    assert_eq!(events.count(SwarmEventKind::AgentRetrying), 2);

    let snap = snapshot(&handle).await;
    let a1 = snap.agent("A1").unwrap();
    assert_eq!(a1.status, AgentStatus::Complete);
    assert_eq!(a1.attempts, 3);
    assert!(a1.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_agent_and_stall_mission() {
    let backend = Arc::new(ScriptedBackend::new(chain()).failing("A2", u32::MAX));
    let (handle, archive) = spawn_with(backend.clone(), test_config());
    let mut events = Recorder::new(&handle);

    handle.launch("Audit the supply chain").await.unwrap();
    let stalled = events.until_kind(SwarmEventKind::MissionStalled).await;
    let stuck = stalled.data.unwrap()["agents"].clone();
    assert_eq!(stuck, serde_json::json!(["A2", "A3"]));

    let snap = snapshot(&handle).await;
    assert_eq!(snap.phase, MissionPhase::Running);
    assert_eq!(snap.agent("A1").unwrap().status, AgentStatus::Complete);
    assert_eq!(snap.agent("A2").unwrap().status, AgentStatus::Failed);
    assert_eq!(snap.agent("A3").unwrap().status, AgentStatus::Queued);
    assert_eq!(backend.executions_of("A2"), 3);
    assert!(archive.recent(10).unwrap().is_empty());

    // Manual retry with a fresh budget finishes the mission
    backend.heal("A2");
    handle.retry_agent("A2").await.unwrap();
    events.until_kind(SwarmEventKind::SynthesisCompleted).await;

    let snap = snapshot(&handle).await;
    assert_eq!(snap.phase, MissionPhase::Complete);
    assert_eq!(snap.agent("A2").unwrap().attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stall_policy_leaves_agent_working() {
    let backend = Arc::new(ScriptedBackend::new(chain()).failing("A1", 1));
    let config = SchedulerConfig {
        retry: RetryPolicy::stall_on_failure(),
        ..test_config()
    };
    let (handle, _archive) = spawn_with(backend.clone(), config);
    let mut events = Recorder::new(&handle);

    handle.launch("Trace the outage").await.unwrap();
    events.until_kind(SwarmEventKind::MissionStalled).await;

    let snap = snapshot(&handle).await;
    let a1 = snap.agent("A1").unwrap();
    assert_eq!(a1.status, AgentStatus::Working);
    assert_eq!(a1.progress, 100);
    assert_eq!(a1.last_error.as_deref(), Some("executor provider failed: scripted failure"));

    // Nothing happens on its own
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.executions_of("A1"), 1);

    handle.retry_agent("A1").await.unwrap();
    events.until_agent(SwarmEventKind::AgentCompleted, "A1").await;
    assert_eq!(backend.executions_of("A1"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_executor_timeout_counts_as_failure() {
    let backend = Arc::new(ScriptedBackend::new(chain()).hanging("Slow goal"));
    let config = SchedulerConfig {
        executor_timeout_secs: 1,
        retry: RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        },
        ..test_config()
    };
    let (handle, _archive) = spawn_with(backend, config);
    let mut events = Recorder::new(&handle);

    handle.launch("Slow goal").await.unwrap();
    let failed = events.until_agent(SwarmEventKind::AgentFailed, "A1").await;
    let error = failed.data.unwrap()["error"].as_str().unwrap().to_string();
    assert_eq!(error, "executor timed out after 1s");

    let snap = snapshot(&handle).await;
    assert_eq!(snap.agent("A1").unwrap().status, AgentStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_block_freezes_progress_until_unblocked() {
    let backend = Arc::new(ScriptedBackend::new(chain()));
    let (handle, _archive) = spawn_with(backend.clone(), test_config());
    let mut events = Recorder::new(&handle);

    handle.launch("Design a bridge").await.unwrap();
    handle.block_agent("A1").await.unwrap();

    let frozen = snapshot(&handle).await.agent("A1").unwrap().progress;
    assert!(frozen < 100);
    tokio::time::sleep(Duration::from_secs(5)).await;

    let snap = snapshot(&handle).await;
    let a1 = snap.agent("A1").unwrap();
    assert_eq!(a1.status, AgentStatus::Blocked);
    assert_eq!(a1.progress, frozen);
    assert_eq!(backend.executions_of("A1"), 0);

    events.drain();
    assert_eq!(events.count(SwarmEventKind::MissionStalled), 1);

    handle.unblock_agent("A1").await.unwrap();
    let unblocked = events.until_agent(SwarmEventKind::AgentUnblocked, "A1").await;
    assert_eq!(unblocked.data.unwrap()["progress"], serde_json::json!(frozen));

    events.until_kind(SwarmEventKind::SynthesisCompleted).await;
    assert_eq!(snapshot(&handle).await.phase, MissionPhase::Complete);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_agent_commands_are_rejected() {
    let backend = Arc::new(ScriptedBackend::new(chain()));
    let (handle, _archive) = spawn_with(backend, test_config());

    assert_eq!(handle.block_agent("A1").await, Err(SchedulerError::NoMission));

    handle.decompose("Write a field guide").await.unwrap();
    assert!(matches!(
        handle.block_agent("A1").await,
        Err(SchedulerError::InvalidPhase { phase: MissionPhase::Planned, .. })
    ));

    handle.start().await.unwrap();
    assert_eq!(
        handle.block_agent("A2").await,
        Err(SchedulerError::InvalidTransition {
            agent_id: "A2".to_string(),
            status: AgentStatus::Queued,
            action: "block",
        })
    );
    assert_eq!(
        handle.unblock_agent("A1").await,
        Err(SchedulerError::InvalidTransition {
            agent_id: "A1".to_string(),
            status: AgentStatus::Working,
            action: "unblock",
        })
    );
    assert_eq!(
        handle.block_agent("Z9").await,
        Err(SchedulerError::UnknownAgent("Z9".to_string()))
    );
    assert!(matches!(
        handle.retry_agent("A1").await,
        Err(SchedulerError::InvalidTransition { .. })
    ));
    assert!(matches!(
        handle.start().await,
        Err(SchedulerError::InvalidPhase { phase: MissionPhase::Running, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_all_collaborator_calls() {
    let backend = Arc::new(ScriptedBackend::new(fan_out()).hanging("Endless goal"));
    let (handle, _archive) = spawn_with(backend.clone(), test_config());
    let mut events = Recorder::new(&handle);

    handle.launch("Endless goal").await.unwrap();
    events.until_agent(SwarmEventKind::AgentDispatched, "A1").await;

    handle.cancel().await.unwrap();
    events.until_kind(SwarmEventKind::MissionAborted).await;
    let dispatched = backend.executions.lock().unwrap().len();

    tokio::time::sleep(Duration::from_secs(7200)).await;
    events.drain();

    assert_eq!(events.count(SwarmEventKind::AgentCompleted), 0);
    assert!(events.count(SwarmEventKind::AgentProgress) > 0);
    assert_eq!(backend.executions.lock().unwrap().len(), dispatched);

    let snap = snapshot(&handle).await;
    assert_eq!(snap.phase, MissionPhase::Aborted);
    assert!(matches!(
        handle.cancel().await,
        Err(SchedulerError::InvalidPhase { phase: MissionPhase::Aborted, .. })
    ));
    assert!(matches!(
        handle.start().await,
        Err(SchedulerError::InvalidPhase { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_new_goal_supersedes_running_mission() {
    let backend = Arc::new(ScriptedBackend::new(chain()).hanging("First goal"));
    let (handle, _archive) = spawn_with(backend, test_config());
    let mut events = Recorder::new(&handle);

    let first = handle.launch("First goal").await.unwrap();
    events.until_agent(SwarmEventKind::AgentDispatched, "A1").await;

    let second = handle.launch("Second goal").await.unwrap();
    assert_ne!(first.mission.id, second.mission.id);
    events.until_kind(SwarmEventKind::SynthesisCompleted).await;
    tokio::time::sleep(Duration::from_secs(7200)).await;
    events.drain();

    let superseded = events
        .seen
        .iter()
        .position(|(_, e)| e.kind == SwarmEventKind::MissionSuperseded)
        .unwrap();
    assert_eq!(events.seen[superseded].1.mission_id, first.mission.id);
    assert!(events.seen[superseded + 1..]
        .iter()
        .all(|(_, e)| e.mission_id != first.mission.id));

    let snap = snapshot(&handle).await;
    assert_eq!(snap.mission.id, second.mission.id);
    assert_eq!(snap.phase, MissionPhase::Complete);
}

#[tokio::test(start_paused = true)]
async fn test_pending_decomposition_is_superseded() {
    let gate = Arc::new(Notify::new());
    let mut backend = ScriptedBackend::new(chain());
    backend.decompose_gate = Some(("Gated goal".to_string(), gate.clone()));
    let (handle, _archive) = spawn_with(Arc::new(backend), test_config());

    let first = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.decompose("Gated goal").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = handle.decompose("Open goal").await.unwrap();
    gate.notify_waiters();

    assert_eq!(
        first.await.unwrap().unwrap_err(),
        SchedulerError::Decomposition(DecompositionError::Superseded)
    );
    assert_eq!(snapshot(&handle).await.mission.id, second.mission.id);
}

#[tokio::test(start_paused = true)]
async fn test_empty_goal_keeps_current_mission() {
    let backend = Arc::new(ScriptedBackend::new(chain()));
    let (handle, _archive) = spawn_with(backend.clone(), test_config());

    let planned = handle.decompose("Catalogue the archive").await.unwrap();
    assert_eq!(
        handle.decompose("   ").await.unwrap_err(),
        SchedulerError::Decomposition(DecompositionError::EmptyGoal)
    );

    let snap = snapshot(&handle).await;
    assert_eq!(snap.mission.id, planned.mission.id);
    assert_eq!(snap.phase, MissionPhase::Planned);
    assert_eq!(backend.seen_memory.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_decomposition_discards_previous_mission() {
    let mut failing = ScriptedBackend::new(chain());
    failing.decompose_error = Some(DecompositionError::Provider("quota".to_string()));
    let (handle, _archive) = spawn_with(Arc::new(failing), test_config());
    assert_eq!(
        handle.decompose("Anything").await.unwrap_err(),
        SchedulerError::Decomposition(DecompositionError::Provider("quota".to_string()))
    );
    assert!(handle.snapshot().await.unwrap().is_none());

    // The planned mission is superseded before the provider answers
    let backend = ScriptedBackend::new(chain())
        .rejecting("Second try", DecompositionError::Provider("quota".to_string()));
    let (handle, _archive) = spawn_with(Arc::new(backend), test_config());
    let mut events = Recorder::new(&handle);

    handle.decompose("First try").await.unwrap();
    assert_eq!(
        handle.decompose("Second try").await.unwrap_err(),
        SchedulerError::Decomposition(DecompositionError::Provider("quota".to_string()))
    );
    events.drain();
    assert_eq!(events.count(SwarmEventKind::MissionSuperseded), 1);
    assert!(handle.snapshot().await.unwrap().is_none());
    assert_eq!(handle.start().await.unwrap_err(), SchedulerError::NoMission);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_plan_is_rejected() {
    let dangling = vec![
        AgentPlan::new("A1", "Researcher", "Gathers sources"),
        AgentPlan::new("A2", "Analyst", "Compares findings").after("A7"),
    ];
    let (handle, _archive) = spawn_with(Arc::new(ScriptedBackend::new(dangling)), test_config());
    assert!(matches!(
        handle.decompose("Anything").await,
        Err(SchedulerError::Decomposition(DecompositionError::InvalidPlan(_)))
    ));
    assert!(handle.snapshot().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_archive_reads_stay_off_the_command_loop() {
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let entered = Arc::new(Notify::new());
    let archive = Arc::new(GatedArchive {
        inner: InMemoryArchive::new(),
        entered: entered.clone(),
        release: Mutex::new(release_rx),
    });
    let backend = Arc::new(ScriptedBackend::new(chain()));
    let handle = SwarmScheduler::spawn(Collaborators::uniform(backend), archive, test_config());

    let pending = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.decompose("Index the library").await })
    };
    entered.notified().await;

    // The read is parked on a blocking thread, commands still get answers
    assert!(handle.snapshot().await.unwrap().is_none());
    assert_eq!(handle.start().await.unwrap_err(), SchedulerError::NoMission);

    release_tx.send(()).unwrap();
    let planned = pending.await.unwrap().unwrap();
    assert_eq!(planned.phase, MissionPhase::Planned);
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_failure_is_retryable() {
    let backend = Arc::new(ScriptedBackend::new(chain()).failing_synthesis(1));
    let (handle, archive) = spawn_with(backend, test_config());
    let mut events = Recorder::new(&handle);

    handle.launch("Summarise the hearings").await.unwrap();
    events.until_kind(SwarmEventKind::SynthesisFailed).await;

    let snap = snapshot(&handle).await;
    assert_eq!(snap.phase, MissionPhase::SynthesisFailed);
    assert!(snap.mission.agents.iter().all(|a| a.status == AgentStatus::Complete));
    assert!(snap.mission.final_report.is_none());
    assert!(archive.recent(10).unwrap().is_empty());

    handle.retry_synthesis().await.unwrap();
    events.until_kind(SwarmEventKind::SynthesisCompleted).await;

    assert_eq!(snapshot(&handle).await.phase, MissionPhase::Complete);
    assert_eq!(archive.recent(10).unwrap().len(), 1);
    assert_eq!(
        handle.retry_synthesis().await,
        Err(SchedulerError::Synthesis(SynthesisError::NotReady))
    );
}

#[tokio::test(start_paused = true)]
async fn test_follow_up_requires_report_and_windows_history() {
    let backend = Arc::new(ScriptedBackend::new(chain()));
    let config = SchedulerConfig {
        chat_window: 2,
        ..test_config()
    };
    let (handle, _archive) = spawn_with(backend.clone(), config);
    let mut events = Recorder::new(&handle);

    handle.launch("Explain tides").await.unwrap();
    assert_eq!(
        handle.ask("Why?").await,
        Err(SchedulerError::Query(QueryError::NoReport))
    );

    events.until_kind(SwarmEventKind::SynthesisCompleted).await;
    assert_eq!(
        handle.ask("  ").await,
        Err(SchedulerError::Query(QueryError::EmptyQuestion))
    );

    let answer = handle.ask("What drives them?").await.unwrap();
    assert_eq!(answer, "Answer to: What drives them?");
    let snap = snapshot(&handle).await;
    assert_eq!(snap.chat.len(), 2);
    assert_eq!(snap.chat[0].role, ChatRole::User);
    assert_eq!(snap.chat[1].content, answer);

    handle.ask("And the moon?").await.unwrap();
    handle.ask("Spring tides?").await.unwrap();

    let histories = backend.seen_history.lock().unwrap().clone();
    assert_eq!(histories.iter().map(Vec::len).collect::<Vec<_>>(), vec![0, 2, 2]);
    assert_eq!(histories[2][0].content, "And the moon?");
    assert_eq!(snapshot(&handle).await.chat.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_decomposer_sees_recent_archive() {
    let backend = Arc::new(ScriptedBackend::new(chain()));
    let archive = Arc::new(InMemoryArchive::new());
    for i in 0..7 {
        archive
            .append(&format!("Goal {}", i), &format!("Report {}", i))
            .unwrap();
    }
    let handle = SwarmScheduler::spawn(
        Collaborators::uniform(backend.clone()),
        archive,
        test_config(),
    );

    handle.decompose("Goal 7").await.unwrap();

    let memory = backend.seen_memory.lock().unwrap()[0].clone();
    let goals: Vec<&str> = memory.iter().map(|r| r.goal.as_str()).collect();
    assert_eq!(goals, vec!["Goal 6", "Goal 5", "Goal 4", "Goal 3", "Goal 2"]);
}

#[test]
fn test_backoff_doubles() {
    let policy = RetryPolicy {
        max_attempts: 5,
        backoff_ms: 100,
        on_exhausted: ExhaustedAction::Fail,
    };
    assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
    assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
    assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
}

#[test]
fn test_increment_range_is_sane() {
    let config = SchedulerConfig {
        min_increment: 0,
        max_increment: 0,
        ..SchedulerConfig::default()
    };
    assert_eq!(config.increment_range(), (1, 1));

    let config = SchedulerConfig {
        min_increment: 5,
        max_increment: 2,
        ..SchedulerConfig::default()
    };
    assert_eq!(config.increment_range(), (5, 5));
}

#[test]
fn test_config_deserializes_with_defaults() {
    let config: SchedulerConfig =
        serde_json::from_str(r#"{ "settle_delay_ms": 0, "retry": { "max_attempts": 1, "backoff_ms": 0 } }"#)
            .unwrap();
    assert_eq!(config.settle_delay_ms, 0);
    assert_eq!(config.tick_interval_ms, 50);
    assert_eq!(config.retry.on_exhausted, ExhaustedAction::Fail);
}
