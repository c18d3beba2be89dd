//! Supervisor loop
//!
//! Single consumer of the event bus. For every event, in publish order:
//! append to history, fold into the global context, run the handlers
//! registered for the type, consult the policy table and run an intervention
//! if it asks for one, then re-broadcast the event to subscribers.

use super::analyzer::{AnalyzerKind, HeuristicAnalyzer, IssueAnalyzer, ModelAnalyzer};
use super::context::{
    AgentMirror, ContextSnapshot, GlobalContext, PageActivity, SessionInfo, SNAPSHOT_EVENTS,
};
use super::handler::EventHandler;
use super::intervention::{InterventionRecord, IssueContext, Strategy};
use super::policy::{self, PolicyThresholds};
use crate::bus::{EventBus, EventDraft, EventHistory, EventReceiver, GlobalEvent, AGENT_SPAWNED, AGENT_STUCK};
use crate::clock::{elapsed_between, format_duration, SharedClock};
use crate::pool::{AgentPool, AgentStatus};
use crate::quota::ModelDescriptor;
use crate::routing::{ModelRouter, TaskProfile};
use crate::{metrics, OverseerError, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Source name on events the supervisor publishes itself
pub const SUPERVISOR_SOURCE: &str = "supervisor";

fn default_history_capacity() -> usize {
    10_000
}

fn default_stale_after_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_journey_capacity() -> usize {
    1000
}

fn default_slow_response_ms() -> u64 {
    5000
}

fn default_broadcast_capacity() -> usize {
    1000
}

/// Supervisor limits and thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Events kept in history before the oldest is evicted
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Silence after which an agent counts as stuck
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// How often busy agents are checked for silence
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_journey_capacity")]
    pub journey_capacity: usize,

    /// `system:performance` reports slower than this trigger an intervention
    #[serde(default = "default_slow_response_ms")]
    pub slow_response_ms: u64,

    /// Buffered broadcasts per subscriber before it starts lagging
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    #[serde(default)]
    pub analyzer: AnalyzerKind,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            stale_after_secs: default_stale_after_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            journey_capacity: default_journey_capacity(),
            slow_response_ms: default_slow_response_ms(),
            broadcast_capacity: default_broadcast_capacity(),
            analyzer: AnalyzerKind::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    fn thresholds(&self) -> PolicyThresholds {
        PolicyThresholds {
            stale_after: self.stale_after(),
            slow_response_ms: self.slow_response_ms,
        }
    }
}

/// Commands accepted by a running supervisor
#[derive(Debug, Clone)]
pub enum SupervisorCommand {
    /// Check for silent agents now instead of waiting for the next sweep
    SweepNow,

    /// Stop the loop
    Shutdown,
}

/// Aggregate counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupervisorMetrics {
    pub events_processed: u64,
    pub interventions_made: u64,
    pub agents_spawned: u64,
    pub errors_resolved: u64,
    pub handler_failures: u64,
    pub uptime_start: DateTime<Utc>,
}

/// Health summary for operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub total_agents: usize,
    pub active_agents: usize,
    pub error_agents: usize,
    pub events_processed: u64,
    pub interventions_made: u64,
    pub uptime: String,
    pub uptime_secs: u64,
    pub queue_depth: usize,
    pub history_len: usize,
}

/// Answer to a user query
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub response_text: String,
    pub context_snapshot: ContextSnapshot,
    pub model_used: Option<String>,
    /// Whether a model answered; false when the text is a fallback message
    pub intervention_available: bool,
}

/// Collaborators the supervisor calls into
#[derive(Clone)]
pub struct Services {
    pub bus: EventBus,
    pub pool: AgentPool,
    pub router: Arc<ModelRouter>,
    pub candidates: Arc<Vec<ModelDescriptor>>,
    pub clock: SharedClock,
}

struct SharedState {
    history: RwLock<EventHistory>,
    context: RwLock<GlobalContext>,
    metrics: RwLock<SupervisorMetrics>,
}

/// Cloneable read side of a supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    shared: Arc<SharedState>,
    services: Services,
    broadcast_tx: broadcast::Sender<GlobalEvent>,
    command_tx: mpsc::Sender<SupervisorCommand>,
}

/// The supervisor loop and the state it owns
pub struct Supervisor {
    config: SupervisorConfig,
    events: EventReceiver,
    services: Services,
    analyzer: Arc<dyn IssueAnalyzer>,
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    shared: Arc<SharedState>,
    broadcast_tx: broadcast::Sender<GlobalEvent>,
    command_tx: mpsc::Sender<SupervisorCommand>,
    command_rx: Option<mpsc::Receiver<SupervisorCommand>>,
    next_intervention: u64,
}

impl Supervisor {
    /// Create a supervisor consuming `events`
    pub fn new(config: SupervisorConfig, services: Services, events: EventReceiver) -> Self {
        let analyzer: Arc<dyn IssueAnalyzer> = match config.analyzer {
            AnalyzerKind::Heuristic => Arc::new(HeuristicAnalyzer),
            AnalyzerKind::Model => Arc::new(ModelAnalyzer::new(
                services.router.clone(),
                services.candidates.clone(),
            )),
        };
        let (broadcast_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));
        let (command_tx, command_rx) = mpsc::channel(10);
        let shared = Arc::new(SharedState {
            history: RwLock::new(EventHistory::new(config.history_capacity)),
            context: RwLock::new(GlobalContext::new(config.journey_capacity)),
            metrics: RwLock::new(SupervisorMetrics {
                events_processed: 0,
                interventions_made: 0,
                agents_spawned: 0,
                errors_resolved: 0,
                handler_failures: 0,
                uptime_start: services.clock.now(),
            }),
        });

        Self {
            config,
            events,
            services,
            analyzer,
            handlers: HashMap::new(),
            shared,
            broadcast_tx,
            command_tx,
            command_rx: Some(command_rx),
            next_intervention: 0,
        }
    }

    /// Replace the analyzer chosen by the configuration
    pub fn with_analyzer(mut self, analyzer: Arc<dyn IssueAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Register a handler for one exact event type
    pub fn register_handler(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(event_type.into()).or_default().push(handler);
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            shared: self.shared.clone(),
            services: self.services.clone(),
            broadcast_tx: self.broadcast_tx.clone(),
            command_tx: self.command_tx.clone(),
        }
    }

    /// Run until shutdown or until every producer is gone
    pub async fn run(mut self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| OverseerError::Config("Supervisor already running".to_string()))?;

        let period = self.config.sweep_interval();
        let mut sweep = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        info!(
            history_capacity = self.config.history_capacity,
            sweep_interval = %format_duration(period),
            "Supervisor started"
        );

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.process_event(event).await,
                    None => {
                        info!("Event bus closed");
                        break;
                    }
                },
                _ = sweep.tick() => self.sweep(),
                command = command_rx.recv() => match command {
                    Some(SupervisorCommand::SweepNow) => self.sweep(),
                    Some(SupervisorCommand::Shutdown) | None => {
                        info!("Supervisor shutting down");
                        break;
                    }
                },
            }
        }

        Ok(())
    }

    /// Process every event queued so far, including ones published while draining
    pub async fn drain(&mut self) -> usize {
        let mut processed = 0;
        while let Some(event) = self.events.try_recv() {
            self.process_event(event).await;
            processed += 1;
        }
        processed
    }

    async fn process_event(&mut self, event: GlobalEvent) {
        let now = self.services.clock.now();
        debug!(event_id = %event.id, event_type = %event.event_type, "Processing event");
        metrics::record_event(&event.event_type);

        self.shared.history.write().push(event.clone());
        let issue = {
            let mut context = self.shared.context.write();
            let previous = event
                .agent_id()
                .and_then(|id| context.agents.get(id))
                .cloned();
            context.apply(&event);
            policy::assess(&event, previous.as_ref(), self.config.thresholds(), now)
        };
        {
            let mut counters = self.shared.metrics.write();
            counters.events_processed += 1;
            if event.event_type == AGENT_SPAWNED {
                counters.agents_spawned += 1;
            }
        }

        self.dispatch(&event).await;

        if let Some(issue) = issue {
            self.intervene(issue).await;
        }

        if self.broadcast_tx.send(event).is_err() {
            debug!("Event processed but no broadcast subscribers");
        }
    }

    /// Run the handlers for the event's type, isolating each one
    async fn dispatch(&self, event: &GlobalEvent) {
        let Some(handlers) = self.handlers.get(&event.event_type) else {
            return;
        };

        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "handler panicked".to_string(),
            };

            let failure = OverseerError::Handler {
                event_type: event.event_type.clone(),
                message,
            };
            error!(event_id = %event.id, error = %failure, "Event handler failed");
            metrics::record_handler_failure(&event.event_type);
            self.shared.metrics.write().handler_failures += 1;
        }
    }

    /// Analyze an issue, pick and run a strategy, and record the outcome
    pub async fn intervene(&mut self, issue: IssueContext) -> InterventionRecord {
        self.next_intervention += 1;
        let id = format!("int-{}", self.next_intervention);
        info!(intervention_id = %id, issue_type = %issue.issue_type, "Intervention started");

        let snapshot = self.handle().snapshot(None, None);
        let analysis = self.analyzer.analyze(&issue, &snapshot).await;
        let strategy = Strategy::select(issue.issue_type, analysis.confidence);
        let (success, result) = self.execute(strategy, &issue);

        let record = InterventionRecord {
            id,
            issue_type: issue.issue_type,
            agent_id: issue.agent_id.clone(),
            analysis,
            strategy,
            result,
            success,
            timestamp: self.services.clock.now(),
        };

        self.shared.context.write().push_intervention(record.clone());
        {
            let mut counters = self.shared.metrics.write();
            counters.interventions_made += 1;
            if success {
                counters.errors_resolved += 1;
            }
        }
        metrics::record_intervention(strategy.as_str(), success);
        info!(
            intervention_id = %record.id,
            strategy = %strategy,
            success,
            "Intervention completed"
        );

        record
    }

    fn execute(&self, strategy: Strategy, issue: &IssueContext) -> (bool, Value) {
        let pool = &self.services.pool;
        match strategy {
            Strategy::SmartRecovery => {
                let Some(agent_id) = issue.agent_id.as_deref() else {
                    return (false, json!({"action": "smart_recovery", "error": "no agent in issue"}));
                };
                match pool.set_status(agent_id, AgentStatus::Active) {
                    Ok(()) => (
                        true,
                        json!({"action": "smart_recovery", "agent_id": agent_id, "status": "active"}),
                    ),
                    Err(e) => (
                        false,
                        json!({"action": "smart_recovery", "agent_id": agent_id, "error": e.to_string()}),
                    ),
                }
            }
            Strategy::SafeRestart => {
                let Some(agent) = issue.agent_id.as_deref().and_then(|id| pool.get_info(id)) else {
                    return (
                        false,
                        json!({"action": "safe_restart", "agent_id": issue.agent_id, "error": "agent not found"}),
                    );
                };
                pool.terminate(&agent.agent_id, "safe_restart");
                match pool.request_spawn(
                    agent.kind.as_str(),
                    agent.purpose.clone(),
                    agent.page_context.clone(),
                    Some(agent.config.clone()),
                ) {
                    Ok(replacement) => (
                        true,
                        json!({"action": "safe_restart", "agent_id": agent.agent_id, "replacement": replacement}),
                    ),
                    Err(e) => (
                        false,
                        json!({"action": "safe_restart", "agent_id": agent.agent_id, "error": e.to_string()}),
                    ),
                }
            }
            Strategy::ResourceOptimization => {
                let cleaned = pool.cleanup();
                (true, json!({"action": "resource_optimization", "agents_cleaned": cleaned}))
            }
            Strategy::MemoryCleanup => {
                let now = self.services.clock.now();
                let trimmed = self
                    .shared
                    .context
                    .write()
                    .trim(now, self.config.stale_after());
                (true, json!({"action": "memory_cleanup", "trimmed": trimmed}))
            }
            Strategy::DiagnosticCollection => {
                let health = self.handle().system_health();
                (
                    true,
                    json!({
                        "action": "diagnostic_collection",
                        "pool": pool.stats(),
                        "health": health,
                        "detail": issue.detail,
                    }),
                )
            }
        }
    }

    /// Report busy agents that went silent as `agent:stuck`
    fn sweep(&self) {
        let now = self.services.clock.now();
        let silent: Vec<(String, DateTime<Utc>)> = {
            let context = self.shared.context.read();
            context
                .silent_busy_agents(now, self.config.stale_after())
                .into_iter()
                .map(|a| (a.agent_id.clone(), a.last_heartbeat))
                .collect()
        };

        for (agent_id, last_heartbeat) in silent {
            let silent_for = elapsed_between(last_heartbeat, now);
            warn!(
                agent_id = %agent_id,
                silent_for = %format_duration(silent_for),
                "Agent appears stuck"
            );
            self.shared.context.write().mark_stuck_reported(&agent_id);
            let draft = EventDraft::new(AGENT_STUCK, SUPERVISOR_SOURCE).with_payload(json!({
                "agent_id": agent_id,
                "last_heartbeat": last_heartbeat.to_rfc3339(),
                "silent_for_secs": silent_for.as_secs(),
            }));
            if let Err(e) = self.services.bus.publish(draft) {
                warn!(error = %e, "Failed to publish stuck agent report");
            }
        }
    }
}

impl SupervisorHandle {
    /// Receive every event after it has been processed
    pub fn subscribe(&self) -> broadcast::Receiver<GlobalEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Publish onto the bus the supervisor consumes
    pub fn publish(&self, draft: EventDraft) -> Result<String> {
        self.services.bus.publish(draft)
    }

    pub fn system_health(&self) -> SystemHealth {
        let now = self.services.clock.now();
        let (total_agents, active_agents, error_agents) = {
            let context = self.shared.context.read();
            (
                context.agents.len(),
                context.live_agents().len(),
                context.count_with_status(AgentStatus::Error),
            )
        };
        let counters = self.metrics();
        let uptime = elapsed_between(counters.uptime_start, now);

        SystemHealth {
            total_agents,
            active_agents,
            error_agents,
            events_processed: counters.events_processed,
            interventions_made: counters.interventions_made,
            uptime: format_duration(uptime),
            uptime_secs: uptime.as_secs(),
            queue_depth: self.services.bus.queue_depth(),
            history_len: self.shared.history.read().len(),
        }
    }

    pub fn metrics(&self) -> SupervisorMetrics {
        self.shared.metrics.read().clone()
    }

    /// The last `limit` processed events, oldest first
    pub fn recent_events(&self, limit: usize) -> Vec<GlobalEvent> {
        self.shared.history.read().recent(limit)
    }

    pub fn history_len(&self) -> usize {
        self.shared.history.read().len()
    }

    pub fn interventions(&self) -> Vec<InterventionRecord> {
        self.shared.context.read().intervention_history.clone()
    }

    pub fn active_pages(&self) -> HashMap<String, PageActivity> {
        self.shared.context.read().active_pages.clone()
    }

    pub fn sessions(&self) -> HashMap<String, SessionInfo> {
        self.shared.context.read().active_sessions.clone()
    }

    /// The supervisor's view of one agent
    pub fn agent(&self, agent_id: &str) -> Option<AgentMirror> {
        self.shared.context.read().agents.get(agent_id).cloned()
    }

    pub fn snapshot(&self, current_page: Option<String>, session_id: Option<String>) -> ContextSnapshot {
        let recent_events = self.recent_events(SNAPSHOT_EVENTS);
        self.shared
            .context
            .read()
            .snapshot(current_page, session_id, recent_events)
    }

    /// Answer a user query with the current context
    ///
    /// Never fails: when no model can answer, the response carries a fallback
    /// message and `intervention_available` is false.
    pub async fn query(&self, user_query: &str, page: &str, session_id: Option<&str>) -> QueryResponse {
        let snapshot = self.snapshot(Some(page.to_string()), session_id.map(str::to_string));
        let health = self.system_health();
        let prompt = format!(
            "You supervise this system and see all of its activity.\n\n\
             User location: {}\nSession: {}\nRecent journey: {}\nActive agents: {}\n\
             System health: {}\n\nUser query: {}\n",
            page,
            session_id.unwrap_or("none"),
            serde_json::to_string(&snapshot.recent_journey).unwrap_or_default(),
            serde_json::to_string(&snapshot.active_agents).unwrap_or_default(),
            serde_json::to_string(&health).unwrap_or_default(),
            user_query,
        );
        let complexity = TaskProfile::from_prompt(user_query).complexity;
        let profile = TaskProfile::from_prompt(prompt).with_complexity(complexity);

        match self
            .services
            .router
            .route(&profile, &self.services.candidates)
            .await
        {
            Ok(result) => QueryResponse {
                response_text: result.content,
                context_snapshot: snapshot,
                model_used: Some(result.model_used),
                intervention_available: true,
            },
            Err(e) => {
                warn!(error = %e, "Query could not be routed");
                QueryResponse {
                    response_text: format!(
                        "The supervisor is monitoring, but no model is available to answer: {}",
                        e
                    ),
                    context_snapshot: snapshot,
                    model_used: None,
                    intervention_available: false,
                }
            }
        }
    }

    /// Ask the loop to check for silent agents now
    pub async fn sweep_now(&self) -> Result<()> {
        self.send(SupervisorCommand::SweepNow).await
    }

    /// Ask the loop to stop
    pub async fn shutdown(&self) -> Result<()> {
        self.send(SupervisorCommand::Shutdown).await
    }

    async fn send(&self, command: SupervisorCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| OverseerError::Other("Supervisor is not running".to_string()))
    }
}
