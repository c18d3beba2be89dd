//! Agent pool for lifecycle operations
//!
//! Accepts spawn requests, initializes agents on a single spawn worker, reaps
//! idle or failing agents on a cleanup worker and publishes every lifecycle
//! change on the event bus.

use super::agent::{AgentConfig, AgentRecord, AgentStatus};
use super::template::AgentKind;
use crate::bus::{EventBus, AGENT_ERROR, AGENT_HEARTBEAT, AGENT_SPAWNED, AGENT_TERMINATED};
use crate::clock::{ceil_secs, format_duration, SharedClock};
use crate::metrics;
use crate::quota::ModelDescriptor;
use crate::routing::ModelRouter;
use crate::{OverseerError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Source name on events published by the pool
pub const POOL_SOURCE: &str = "agent_pool";

fn default_max_agents() -> usize {
    8000
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_error_threshold() -> u32 {
    5
}

/// Pool limits and timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Hard cap on registered plus queued agents
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Errors an agent may accumulate before it is terminated
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    /// Idle timeout overrides per kind, in seconds
    #[serde(default)]
    pub idle_timeouts: BTreeMap<AgentKind, u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            error_threshold: default_error_threshold(),
            idle_timeouts: BTreeMap::new(),
        }
    }
}

impl PoolConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn with_max_agents(mut self, max_agents: usize) -> Self {
        self.max_agents = max_agents;
        self
    }

    /// Stored in whole seconds, rounded up
    pub fn with_idle_timeout(mut self, kind: AgentKind, timeout: Duration) -> Self {
        self.idle_timeouts.insert(kind, ceil_secs(timeout));
        self
    }
}

/// Pool counters and occupancy
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub total_spawned: u64,
    pub active_agents: usize,
    pub terminated_agents: u64,
    pub spawn_requests: u64,
    pub spawn_failures: u64,
    pub cleanup_runs: u64,
    pub queue_size: usize,
    pub max_agents: usize,
    /// Registered agents as a percentage of `max_agents`
    pub capacity_used: f64,
    pub active_by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
}

/// A queued spawn request
#[derive(Debug, Clone)]
struct SpawnJob {
    agent_id: String,
    kind: AgentKind,
    purpose: String,
    page_context: String,
    config: AgentConfig,
}

#[derive(Default)]
struct Counters {
    total_spawned: u64,
    terminated: u64,
    spawn_requests: u64,
    spawn_failures: u64,
    cleanup_runs: u64,
}

#[derive(Default)]
struct PoolState {
    agents: HashMap<String, AgentRecord>,
    /// Accepted ids whose job has not been initialized yet
    pending: HashSet<String>,
    next_id: u64,
    counters: Counters,
}

impl PoolState {
    fn occupancy(&self) -> usize {
        self.agents.len() + self.pending.len()
    }
}

struct PoolInner {
    config: PoolConfig,
    router: Arc<ModelRouter>,
    candidates: Arc<Vec<ModelDescriptor>>,
    bus: EventBus,
    clock: SharedClock,
    state: Mutex<PoolState>,
    jobs_tx: mpsc::UnboundedSender<SpawnJob>,
    jobs_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SpawnJob>>,
}

/// Outcome of removing an id from the pool
enum Removed {
    Agent(Box<AgentRecord>),
    Pending,
    Unknown,
}

/// Bounded registry of agents; cheap to clone
#[derive(Clone)]
pub struct AgentPool {
    inner: Arc<PoolInner>,
}

impl AgentPool {
    /// Create a pool that assigns models from `candidates` through `router`
    pub fn new(
        config: PoolConfig,
        router: Arc<ModelRouter>,
        candidates: Arc<Vec<ModelDescriptor>>,
        bus: EventBus,
        clock: SharedClock,
    ) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(PoolInner {
                config,
                router,
                candidates,
                bus,
                clock,
                state: Mutex::new(PoolState::default()),
                jobs_tx,
                jobs_rx: tokio::sync::Mutex::new(jobs_rx),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn publish(&self, event_type: &str, payload: Value) {
        if let Err(e) = self.inner.bus.emit(event_type, POOL_SOURCE, payload) {
            warn!(event_type, error = %e, "Failed to publish pool event");
        }
    }

    /// Accept a spawn request and queue it for initialization
    ///
    /// Returns the new agent's id as soon as the job is queued; the agent
    /// becomes visible once the spawn worker has initialized it. Unknown kinds
    /// become `general`. When the pool is full a cleanup pass runs first and
    /// the request is rejected if it freed nothing.
    pub fn request_spawn(
        &self,
        kind: &str,
        purpose: impl Into<String>,
        page_context: impl Into<String>,
        config: Option<AgentConfig>,
    ) -> Result<String> {
        let kind = AgentKind::resolve(kind);
        let max_agents = self.inner.config.max_agents;

        let full = self.inner.state.lock().occupancy() >= max_agents;
        let cleaned = if full { self.cleanup() } else { 0 };

        let agent_id = {
            let mut state = self.inner.state.lock();
            if state.occupancy() >= max_agents {
                state.counters.spawn_failures += 1;
                drop(state);
                metrics::record_spawn("capacity");
                warn!(max_agents, cleaned, "Agent limit reached");
                return Err(OverseerError::CapacityExceeded {
                    max_agents,
                    cleaned,
                });
            }

            state.next_id += 1;
            let agent_id = format!("{}-{}", kind, state.next_id);
            state.pending.insert(agent_id.clone());
            state.counters.spawn_requests += 1;
            agent_id
        };

        let job = SpawnJob {
            agent_id: agent_id.clone(),
            kind,
            purpose: purpose.into(),
            page_context: page_context.into(),
            config: config.unwrap_or_default(),
        };

        if self.inner.jobs_tx.send(job).is_err() {
            self.inner.state.lock().pending.remove(&agent_id);
            return Err(OverseerError::Other("Spawn queue is closed".to_string()));
        }

        info!(agent_id = %agent_id, kind = %kind, "Agent spawn queued");
        Ok(agent_id)
    }

    /// Initialize one queued job
    async fn initialize(&self, job: SpawnJob) {
        if !self.inner.state.lock().pending.contains(&job.agent_id) {
            debug!(agent_id = %job.agent_id, "Spawn job cancelled before initialization");
            return;
        }

        let template = job.kind.template();
        let class = job.config.model_class.unwrap_or(template.model_class);
        let candidate = self
            .inner
            .router
            .preferred_candidate(class, &self.inner.candidates);

        let Some(candidate) = candidate else {
            {
                let mut state = self.inner.state.lock();
                state.pending.remove(&job.agent_id);
                state.counters.spawn_failures += 1;
            }
            metrics::record_spawn("no_candidate");
            warn!(agent_id = %job.agent_id, "No model candidate available for agent");
            self.publish(
                AGENT_ERROR,
                json!({
                    "agent_id": job.agent_id,
                    "agent_type": job.kind,
                    "phase": "initialization",
                    "error": "No model candidate available",
                }),
            );
            return;
        };

        let now = self.inner.clock.now();
        let mut config = job.config;
        if config.idle_timeout_secs.is_none() {
            config.idle_timeout_secs = self.inner.config.idle_timeouts.get(&job.kind).copied();
        }
        let mut record = AgentRecord::new(
            &job.agent_id,
            &template,
            job.purpose,
            job.page_context,
            config,
            &candidate,
            now,
        );
        record.status = AgentStatus::Active;

        let registered = {
            let mut state = self.inner.state.lock();
            // Terminated while the model was being assigned
            if !state.pending.remove(&job.agent_id) {
                false
            } else {
                state.agents.insert(record.agent_id.clone(), record.clone());
                state.counters.total_spawned += 1;
                metrics::set_agent_count(state.agents.len());
                true
            }
        };
        if !registered {
            return;
        }

        metrics::record_spawn("spawned");
        info!(
            agent_id = %record.agent_id,
            kind = %record.kind,
            model = %record.model_id,
            account = %record.account_id,
            "Agent spawned"
        );

        self.publish(
            AGENT_SPAWNED,
            json!({
                "agent_id": record.agent_id,
                "agent_type": record.kind,
                "purpose": record.purpose,
                "page_context": record.page_context,
                "capabilities": record.capabilities,
                "model": record.model_id,
                "account": record.account_id,
            }),
        );
        self.publish(AGENT_HEARTBEAT, record.heartbeat_payload());
    }

    /// Initialize every job queued so far, in order
    ///
    /// Returns 0 without doing anything while the spawn worker is running.
    pub async fn process_pending(&self) -> usize {
        let jobs: Vec<SpawnJob> = {
            let Ok(mut rx) = self.inner.jobs_rx.try_lock() else {
                return 0;
            };
            let jobs: Vec<SpawnJob> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
            jobs
        };

        let count = jobs.len();
        for job in jobs {
            self.initialize(job).await;
        }
        count
    }

    /// Drain the spawn queue one job at a time until shutdown
    pub async fn run_spawn_worker(self, mut shutdown: watch::Receiver<bool>) {
        let mut rx = self.inner.jobs_rx.lock().await;
        info!("Spawn worker started");

        loop {
            let job = tokio::select! {
                _ = shutdown.changed() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            // A dequeued job always runs to completion
            self.initialize(job).await;
        }

        info!("Spawn worker stopped");
    }

    /// Run a cleanup pass on a fixed interval until shutdown
    pub async fn run_cleanup_worker(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.inner.config.cleanup_interval();
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        info!(interval = %format_duration(period), "Cleanup worker started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    let cleaned = self.cleanup();
                    if cleaned > 0 {
                        info!(cleaned, "Cleaned up idle/error agents");
                    }
                }
            }
        }

        info!("Cleanup worker stopped");
    }

    /// Terminate idle-expired agents and agents past the error threshold
    pub fn cleanup(&self) -> usize {
        let now = self.inner.clock.now();
        let threshold = self.inner.config.error_threshold;

        let expired: Vec<(String, &'static str)> = {
            let mut state = self.inner.state.lock();
            state.counters.cleanup_runs += 1;
            state
                .agents
                .values()
                .filter_map(|agent| {
                    if agent.is_idle_expired(now) {
                        Some((agent.agent_id.clone(), "idle_timeout"))
                    } else if agent.status == AgentStatus::Error && agent.error_count > threshold {
                        Some((agent.agent_id.clone(), "error_threshold"))
                    } else {
                        None
                    }
                })
                .collect()
        };

        expired
            .into_iter()
            .filter(|(agent_id, reason)| self.terminate(agent_id, reason))
            .count()
    }

    /// Terminate an agent, or cancel a queued spawn
    ///
    /// Returns false if the id is unknown or already terminated.
    pub fn terminate(&self, agent_id: &str, reason: &str) -> bool {
        let now = self.inner.clock.now();
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = if let Some(mut record) = state.agents.remove(agent_id) {
                record.status = AgentStatus::Terminated;
                Removed::Agent(Box::new(record))
            } else if state.pending.remove(agent_id) {
                Removed::Pending
            } else {
                Removed::Unknown
            };
            if !matches!(removed, Removed::Unknown) {
                state.counters.terminated += 1;
                metrics::set_agent_count(state.agents.len());
            }
            removed
        };

        let payload = match removed {
            Removed::Unknown => {
                debug!(agent_id, "Terminate ignored for unknown agent");
                return false;
            }
            Removed::Pending => json!({
                "agent_id": agent_id,
                "reason": reason,
                "lifetime": format_duration(Duration::ZERO),
                "final_metrics": {},
            }),
            Removed::Agent(record) => json!({
                "agent_id": agent_id,
                "agent_type": record.kind,
                "reason": reason,
                "lifetime": format_duration(record.lifetime(now)),
                "final_metrics": record.final_metrics(now),
            }),
        };

        info!(agent_id, reason, "Agent terminated");
        self.publish(AGENT_TERMINATED, payload);
        true
    }

    /// Note that an agent did work, keeping it from idling out
    pub fn record_activity(&self, agent_id: &str, task_info: Option<Map<String, Value>>) -> Result<()> {
        let heartbeat = {
            let mut state = self.inner.state.lock();
            let agent = state
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| OverseerError::AgentNotFound(agent_id.to_string()))?;

            agent.last_activity = self.inner.clock.now();
            agent.task_count += 1;
            if let Some(info) = task_info {
                agent.metrics.extend(info);
            }
            if agent.task_count == agent.max_tasks {
                debug!(agent_id, max_tasks = agent.max_tasks, "Agent reached its task budget");
            }
            agent.heartbeat_payload()
        };

        self.publish(AGENT_HEARTBEAT, heartbeat);
        Ok(())
    }

    /// Count an error against an agent
    ///
    /// Moves the agent to `Error` and publishes `agent:error`. Past the error
    /// threshold the agent is terminated and `true` is returned.
    pub fn record_error(&self, agent_id: &str, error_info: Value) -> Result<bool> {
        let threshold = self.inner.config.error_threshold;
        let (payload, over_threshold) = {
            let mut state = self.inner.state.lock();
            let agent = state
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| OverseerError::AgentNotFound(agent_id.to_string()))?;

            agent.error_count += 1;
            agent.status = AgentStatus::Error;
            (
                json!({
                    "agent_id": agent_id,
                    "agent_type": agent.kind,
                    "error_info": error_info,
                    "error_count": agent.error_count,
                }),
                agent.error_count > threshold,
            )
        };

        warn!(agent_id, "Agent reported an error");
        self.publish(AGENT_ERROR, payload);

        if over_threshold {
            return Ok(self.terminate(agent_id, "error_threshold_exceeded"));
        }
        Ok(false)
    }

    /// Move an agent to a new status, validated against the state machine
    pub fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        if status == AgentStatus::Terminated {
            return if self.terminate(agent_id, "status_change") {
                Ok(())
            } else {
                Err(OverseerError::AgentNotFound(agent_id.to_string()))
            };
        }

        let heartbeat = {
            let mut state = self.inner.state.lock();
            let agent = state
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| OverseerError::AgentNotFound(agent_id.to_string()))?;

            if !agent.status.can_transition_to(status) {
                return Err(OverseerError::InvalidTransition {
                    agent_id: agent_id.to_string(),
                    from: agent.status.to_string(),
                    to: status.to_string(),
                });
            }
            debug!(agent_id, from = %agent.status, to = %status, "Agent status change");
            agent.status = status;
            agent.heartbeat_payload()
        };

        self.publish(AGENT_HEARTBEAT, heartbeat);
        Ok(())
    }

    /// Snapshot of one agent
    pub fn get_info(&self, agent_id: &str) -> Option<AgentRecord> {
        self.inner.state.lock().agents.get(agent_id).cloned()
    }

    /// Snapshot of every agent, oldest first
    pub fn get_all(&self) -> Vec<AgentRecord> {
        self.collect(|_| true)
    }

    pub fn list_by_kind(&self, kind: AgentKind) -> Vec<AgentRecord> {
        self.collect(|agent| agent.kind == kind)
    }

    pub fn list_by_page(&self, page_context: &str) -> Vec<AgentRecord> {
        self.collect(|agent| agent.page_context == page_context)
    }

    fn collect(&self, keep: impl Fn(&AgentRecord) -> bool) -> Vec<AgentRecord> {
        let mut agents: Vec<AgentRecord> = self
            .inner
            .state
            .lock()
            .agents
            .values()
            .filter(|agent| keep(agent))
            .cloned()
            .collect();
        agents.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        agents
    }

    /// Registered agents
    pub fn len(&self) -> usize {
        self.inner.state.lock().agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accepted spawn requests not yet initialized
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        let max_agents = self.inner.config.max_agents;

        let mut active_by_type = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        for agent in state.agents.values() {
            *active_by_type.entry(agent.kind.to_string()).or_insert(0) += 1;
            *by_status.entry(agent.status.to_string()).or_insert(0) += 1;
        }

        PoolStats {
            total_spawned: state.counters.total_spawned,
            active_agents: state.agents.len(),
            terminated_agents: state.counters.terminated,
            spawn_requests: state.counters.spawn_requests,
            spawn_failures: state.counters.spawn_failures,
            cleanup_runs: state.counters.cleanup_runs,
            queue_size: state.pending.len(),
            max_agents,
            capacity_used: if max_agents == 0 {
                100.0
            } else {
                state.agents.len() as f64 / max_agents as f64 * 100.0
            },
            active_by_type,
            by_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventReceiver, GlobalEvent};
    use crate::clock::ManualClock;
    use crate::quota::{QuotaLedger, QuotaPolicy};
    use crate::routing::{testing::ScriptedClient, RouterConfig};

    struct Fixture {
        pool: AgentPool,
        events: EventReceiver,
        clock: ManualClock,
    }

    fn fixture_with(config: PoolConfig, candidates: Vec<ModelDescriptor>) -> Fixture {
        let clock = ManualClock::new();
        let shared: SharedClock = Arc::new(clock.clone());
        let router = Arc::new(ModelRouter::new(
            QuotaLedger::new(QuotaPolicy::default(), shared.clone()),
            Arc::new(ScriptedClient::new()),
            &RouterConfig::default(),
        ));
        let (bus, events) = EventBus::new(shared.clone());
        let pool = AgentPool::new(config, router, Arc::new(candidates), bus, shared);
        Fixture {
            pool,
            events,
            clock,
        }
    }

    impl Fixture {
        fn set_error_count(&self, agent_id: &str, count: u32) {
            if let Some(agent) = self.pool.inner.state.lock().agents.get_mut(agent_id) {
                agent.error_count = count;
            }
        }
    }

    fn fixture(config: PoolConfig) -> Fixture {
        fixture_with(
            config,
            vec![
                ModelDescriptor::new("primary", "gemini-2.0-flash", 1),
                ModelDescriptor::new("primary", "gemini-2.5-pro", 1),
            ],
        )
    }

    fn drain(events: &mut EventReceiver) -> Vec<GlobalEvent> {
        std::iter::from_fn(|| events.try_recv()).collect()
    }

    fn types(events: &[GlobalEvent]) -> Vec<&str> {
        events.iter().map(|e| e.event_type.as_str()).collect()
    }

    #[tokio::test]
    async fn test_spawn_is_asynchronous() {
        let mut f = fixture(PoolConfig::default());
        let id = f
            .pool
            .request_spawn("coder", "fix bug", "/editor", None)
            .unwrap();
        assert!(id.starts_with("coder-"));
        assert!(f.pool.get_info(&id).is_none());
        assert_eq!(f.pool.pending(), 1);

        assert_eq!(f.pool.process_pending().await, 1);
        let agent = f.pool.get_info(&id).unwrap();
        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(agent.model_id, "gemini-2.5-pro");

        let events = drain(&mut f.events);
        assert_eq!(types(&events), vec![AGENT_SPAWNED, AGENT_HEARTBEAT]);
        assert_eq!(events[0].payload["agent_id"], id.as_str());
    }

    #[tokio::test]
    async fn test_unknown_kind_becomes_general() {
        let f = fixture(PoolConfig::default());
        let id = f.pool.request_spawn("wizard", "magic", "/", None).unwrap();
        f.pool.process_pending().await;
        assert_eq!(f.pool.get_info(&id).unwrap().kind, AgentKind::General);
    }

    #[tokio::test]
    async fn test_init_failure_publishes_error_without_record() {
        let mut f = fixture_with(PoolConfig::default(), vec![]);
        let id = f.pool.request_spawn("general", "help", "/", None).unwrap();
        f.pool.process_pending().await;

        assert!(f.pool.get_info(&id).is_none());
        assert_eq!(f.pool.pending(), 0);
        assert_eq!(f.pool.stats().spawn_failures, 1);

        let events = drain(&mut f.events);
        assert_eq!(types(&events), vec![AGENT_ERROR]);
        assert_eq!(events[0].payload["phase"], "initialization");
    }

    #[tokio::test]
    async fn test_capacity_is_a_hard_cap() {
        let f = fixture(PoolConfig::default().with_max_agents(2));
        f.pool.request_spawn("general", "a", "/", None).unwrap();
        f.pool.request_spawn("general", "b", "/", None).unwrap();

        // Queued jobs count against the cap
        let err = f.pool.request_spawn("general", "c", "/", None).unwrap_err();
        assert!(matches!(
            err,
            OverseerError::CapacityExceeded {
                max_agents: 2,
                cleaned: 0
            }
        ));

        f.pool.process_pending().await;
        assert_eq!(f.pool.len(), 2);
        assert!(f.pool.request_spawn("general", "c", "/", None).is_err());
    }

    #[tokio::test]
    async fn test_full_pool_cleans_before_rejecting() {
        let f = fixture(PoolConfig::default().with_max_agents(1));
        let first = f.pool.request_spawn("monitor", "watch", "/", None).unwrap();
        f.pool.process_pending().await;

        f.clock.advance(Duration::from_secs(6 * 60));
        let second = f.pool.request_spawn("monitor", "watch", "/", None).unwrap();
        assert_ne!(first, second);
        assert!(f.pool.get_info(&first).is_none());
    }

    #[tokio::test]
    async fn test_idle_cleanup() {
        let mut f = fixture(
            PoolConfig::default().with_idle_timeout(AgentKind::General, Duration::from_secs(1)),
        );
        for n in 0..3 {
            f.pool
                .request_spawn("general", format!("task {}", n), "/", None)
                .unwrap();
        }
        f.pool.process_pending().await;
        assert_eq!(f.pool.len(), 3);
        drain(&mut f.events);

        f.clock.advance(Duration::from_secs(2));
        assert_eq!(f.pool.cleanup(), 3);
        assert!(f.pool.is_empty());

        let events = drain(&mut f.events);
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .all(|e| e.event_type == AGENT_TERMINATED && e.payload["reason"] == "idle_timeout"));
    }

    #[test]
    fn test_sub_second_idle_timeout_rounds_up() {
        let config = PoolConfig::default()
            .with_idle_timeout(AgentKind::General, Duration::from_millis(500));
        assert_eq!(config.idle_timeouts[&AgentKind::General], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_worker_reaps_on_interval() {
        let config = PoolConfig {
            cleanup_interval_secs: 1,
            ..PoolConfig::default()
        }
        .with_idle_timeout(AgentKind::General, Duration::from_secs(1));
        let f = fixture(config);
        let id = f.pool.request_spawn("general", "x", "/", None).unwrap();
        f.pool.process_pending().await;
        f.clock.advance(Duration::from_secs(2));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(f.pool.clone().run_cleanup_worker(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(f.pool.get_info(&id).is_some());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(f.pool.get_info(&id).is_none());
        assert_eq!(f.pool.stats().cleanup_runs, 1);

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_activity_and_busy_keep_agents_alive() {
        let f = fixture(
            PoolConfig::default().with_idle_timeout(AgentKind::General, Duration::from_secs(60)),
        );
        let active = f.pool.request_spawn("general", "a", "/", None).unwrap();
        let busy = f.pool.request_spawn("general", "b", "/", None).unwrap();
        f.pool.process_pending().await;
        f.pool.set_status(&busy, AgentStatus::Busy).unwrap();

        f.clock.advance(Duration::from_secs(50));
        f.pool.record_activity(&active, None).unwrap();
        f.clock.advance(Duration::from_secs(50));

        assert_eq!(f.pool.cleanup(), 0);
        assert_eq!(f.pool.get_info(&active).unwrap().task_count, 1);
        assert!(f.pool.get_info(&busy).is_some());
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let mut f = fixture(PoolConfig::default());
        let id = f.pool.request_spawn("qa", "test", "/", None).unwrap();
        f.pool.process_pending().await;
        drain(&mut f.events);

        assert!(f.pool.terminate(&id, "manual_termination"));
        assert!(!f.pool.terminate(&id, "manual_termination"));

        let events = drain(&mut f.events);
        assert_eq!(types(&events), vec![AGENT_TERMINATED]);
        assert_eq!(events[0].payload["reason"], "manual_termination");
        assert_eq!(f.pool.stats().terminated_agents, 1);
    }

    #[tokio::test]
    async fn test_terminate_cancels_queued_spawn() {
        let f = fixture(PoolConfig::default());
        let id = f.pool.request_spawn("qa", "test", "/", None).unwrap();
        assert!(f.pool.terminate(&id, "cancelled"));
        f.pool.process_pending().await;
        assert!(f.pool.get_info(&id).is_none());
        assert_eq!(f.pool.stats().total_spawned, 0);
    }

    #[tokio::test]
    async fn test_error_threshold_terminates() {
        let f = fixture(PoolConfig::default());
        let id = f.pool.request_spawn("coder", "x", "/", None).unwrap();
        f.pool.process_pending().await;

        for _ in 0..5 {
            assert!(!f.pool.record_error(&id, json!({"message": "boom"})).unwrap());
        }
        assert_eq!(f.pool.get_info(&id).unwrap().status, AgentStatus::Error);
        assert!(f.pool.record_error(&id, json!({"message": "boom"})).unwrap());
        assert!(f.pool.get_info(&id).is_none());
    }

    #[tokio::test]
    async fn test_cleanup_reaps_errored_agents() {
        let f = fixture(PoolConfig {
            error_threshold: 1,
            ..Default::default()
        });
        let id = f.pool.request_spawn("coder", "x", "/", None).unwrap();
        f.pool.process_pending().await;
        f.pool.record_error(&id, json!({})).unwrap();
        assert_eq!(f.pool.cleanup(), 0);

        f.set_error_count(&id, 2);
        assert_eq!(f.pool.cleanup(), 1);
    }

    #[tokio::test]
    async fn test_set_status_validates_transitions() {
        let f = fixture(PoolConfig::default());
        let id = f.pool.request_spawn("general", "x", "/", None).unwrap();
        f.pool.process_pending().await;

        f.pool.set_status(&id, AgentStatus::Idle).unwrap();
        let err = f.pool.set_status(&id, AgentStatus::Initializing).unwrap_err();
        assert!(matches!(err, OverseerError::InvalidTransition { .. }));

        assert!(matches!(
            f.pool.set_status("nobody", AgentStatus::Busy),
            Err(OverseerError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_queries_and_stats() {
        let f = fixture(PoolConfig::default().with_max_agents(10));
        f.pool.request_spawn("coder", "a", "/editor", None).unwrap();
        f.pool.request_spawn("coder", "b", "/docs", None).unwrap();
        f.pool.request_spawn("qa", "c", "/editor", None).unwrap();
        f.pool.process_pending().await;

        assert_eq!(f.pool.list_by_kind(AgentKind::Coder).len(), 2);
        assert_eq!(f.pool.list_by_page("/editor").len(), 2);
        assert_eq!(f.pool.get_all().len(), 3);

        let stats = f.pool.stats();
        assert_eq!(stats.total_spawned, 3);
        assert_eq!(stats.spawn_requests, 3);
        assert_eq!(stats.active_by_type.get("coder"), Some(&2));
        assert!((stats.capacity_used - 30.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_spawn_worker_drains_queue() {
        let f = fixture(PoolConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(f.pool.clone().run_spawn_worker(shutdown_rx));

        let id = f.pool.request_spawn("general", "x", "/", None).unwrap();
        for _ in 0..50 {
            if f.pool.get_info(&id).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(f.pool.get_info(&id).is_some());

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();
    }
}
