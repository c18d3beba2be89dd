//! Control plane wiring
//!
//! Builds the ledger, router, bus, pool and supervisor from an
//! [`OverseerConfig`] and starts the background tasks: the supervisor loop,
//! the spawn worker and the cleanup worker. All of them stop together on
//! [`ControlPlane::shutdown`].

use crate::bus::EventBus;
use crate::clock::{SharedClock, SystemClock};
use crate::config::OverseerConfig;
use crate::pool::AgentPool;
use crate::quota::{ModelDescriptor, QuotaLedger};
use crate::routing::{LoopbackClient, ModelEndpointClient, ModelRouter};
use crate::supervisor::{EventHandler, IssueAnalyzer, Services, Supervisor, SupervisorHandle};
use crate::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Builder for a [`ControlPlane`]
pub struct ControlPlaneBuilder {
    config: OverseerConfig,
    client: Arc<dyn ModelEndpointClient>,
    clock: SharedClock,
    analyzer: Option<Arc<dyn IssueAnalyzer>>,
    handlers: Vec<(String, Arc<dyn EventHandler>)>,
}

impl ControlPlaneBuilder {
    /// Start from a configuration, the loopback provider and the system clock
    pub fn new(config: OverseerConfig) -> Self {
        Self {
            config,
            client: Arc::new(LoopbackClient),
            clock: Arc::new(SystemClock),
            analyzer: None,
            handlers: Vec::new(),
        }
    }

    /// Provider used for every model call
    pub fn client(mut self, client: Arc<dyn ModelEndpointClient>) -> Self {
        self.client = client;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Override the analyzer selected in the supervisor configuration
    pub fn analyzer(mut self, analyzer: Arc<dyn IssueAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Register an event handler before the supervisor starts
    pub fn handler(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push((event_type.into(), handler));
        self
    }

    /// Build every component and spawn the background tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> ControlPlane {
        let config = self.config;
        let candidates = Arc::new(config.candidates.clone());
        let ledger = QuotaLedger::new(config.quota.clone(), self.clock.clone());
        let router = Arc::new(
            ModelRouter::new(ledger, self.client, &config.router)
                .with_credentials(config.credentials()),
        );

        let (bus, events) = EventBus::new(self.clock.clone());
        let pool = AgentPool::new(
            config.pool.clone(),
            router.clone(),
            candidates.clone(),
            bus.clone(),
            self.clock.clone(),
        );

        let services = Services {
            bus: bus.clone(),
            pool: pool.clone(),
            router: router.clone(),
            candidates: candidates.clone(),
            clock: self.clock,
        };
        let mut supervisor = Supervisor::new(config.supervisor.clone(), services, events);
        if let Some(analyzer) = self.analyzer {
            supervisor = supervisor.with_analyzer(analyzer);
        }
        for (event_type, handler) in self.handlers {
            supervisor.register_handler(event_type, handler);
        }
        let handle = supervisor.handle();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor_task = tokio::spawn(supervisor.run());
        let workers = vec![
            tokio::spawn(pool.clone().run_spawn_worker(shutdown_rx.clone())),
            tokio::spawn(pool.clone().run_cleanup_worker(shutdown_rx)),
        ];

        info!(
            candidates = candidates.len(),
            max_agents = config.pool.max_agents,
            "Control plane started"
        );

        ControlPlane {
            router,
            pool,
            bus,
            handle,
            candidates,
            shutdown_tx,
            supervisor_task,
            workers,
        }
    }
}

/// A running control plane
pub struct ControlPlane {
    router: Arc<ModelRouter>,
    pool: AgentPool,
    bus: EventBus,
    handle: SupervisorHandle,
    candidates: Arc<Vec<ModelDescriptor>>,
    shutdown_tx: watch::Sender<bool>,
    supervisor_task: JoinHandle<Result<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl ControlPlane {
    pub fn builder(config: OverseerConfig) -> ControlPlaneBuilder {
        ControlPlaneBuilder::new(config)
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn supervisor(&self) -> &SupervisorHandle {
        &self.handle
    }

    pub fn candidates(&self) -> &[ModelDescriptor] {
        &self.candidates
    }

    /// Stop every background task and wait for them to finish
    ///
    /// Events already queued but not yet processed are dropped.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down control plane");
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.shutdown().await {
            warn!(error = %e, "Supervisor already stopped");
        }

        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker task failed");
            }
        }
        match self.supervisor_task.await {
            Ok(result) => result,
            Err(e) => Err(crate::OverseerError::Other(format!("Supervisor task failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventDraft, AGENT_SPAWNED};
    use crate::clock::ManualClock;
    use crate::routing::testing::ScriptedClient;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_through_running_plane() {
        let plane = ControlPlane::builder(OverseerConfig::sample())
            .client(Arc::new(ScriptedClient::new()))
            .clock(Arc::new(ManualClock::new()))
            .start();
        let mut rx = plane.supervisor().subscribe();

        let id = plane.pool().request_spawn("researcher", "summarize", "/docs", None).unwrap();
        let spawned = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.event_type == AGENT_SPAWNED => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("subscription failed: {}", e),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(spawned.agent_id(), Some(id.as_str()));
        assert!(plane.pool().get_info(&id).is_some());
        assert!(plane.supervisor().agent(&id).is_some());
        plane.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_with_queued_events() {
        let plane = ControlPlane::builder(OverseerConfig::sample())
            .clock(Arc::new(ManualClock::new()))
            .start();
        for _ in 0..10 {
            plane
                .bus()
                .publish(EventDraft::new("page:view", "web"))
                .unwrap();
        }
        plane.shutdown().await.unwrap();
    }
}
