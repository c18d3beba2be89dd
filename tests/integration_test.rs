//! Integration tests for Overseer
//!
//! These tests drive the router, the pool and the supervisor together through
//! the public API, with time controlled by a manual clock.

use overseer::bus::{EventBus, EventDraft, AGENT_TERMINATED};
use overseer::clock::{ManualClock, SharedClock};
use overseer::config::{validate_config, OverseerConfig};
use overseer::pool::{AgentKind, AgentPool, AgentStatus, PoolConfig};
use overseer::quota::{ModelDescriptor, QuotaLedger, QuotaPolicy, QuotaStatus};
use overseer::routing::testing::ScriptedClient;
use overseer::routing::{InvokeOutcome, ModelRouter, RouterConfig, TaskProfile};
use overseer::supervisor::{handler_fn, IssueType, Services, Supervisor, SupervisorConfig, SupervisorHandle};
use overseer::OverseerError;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Everything wired together, with the supervisor driven by hand
struct Harness {
    clock: ManualClock,
    client: Arc<ScriptedClient>,
    router: Arc<ModelRouter>,
    pool: AgentPool,
    supervisor: Supervisor,
    handle: SupervisorHandle,
}

fn harness(pool_config: PoolConfig, supervisor_config: SupervisorConfig) -> Harness {
    let clock = ManualClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let client = Arc::new(ScriptedClient::new());
    let candidates = Arc::new(vec![
        ModelDescriptor::new("primary", "gemini-2.0-flash", 1),
        ModelDescriptor::new("primary", "gemini-2.5-pro", 2),
    ]);
    let router = Arc::new(ModelRouter::new(
        QuotaLedger::new(QuotaPolicy::default(), shared.clone()),
        client.clone(),
        &RouterConfig::default(),
    ));
    let (bus, events) = EventBus::new(shared.clone());
    let pool = AgentPool::new(pool_config, router.clone(), candidates.clone(), bus.clone(), shared.clone());
    let supervisor = Supervisor::new(
        supervisor_config,
        Services {
            bus,
            pool: pool.clone(),
            router: router.clone(),
            candidates,
            clock: shared,
        },
        events,
    );
    let handle = supervisor.handle();

    Harness {
        clock,
        client,
        router,
        pool,
        supervisor,
        handle,
    }
}

mod routing_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_quota_error_fails_over_to_limited_peer() {
        let clock = ManualClock::new();
        let shared: SharedClock = Arc::new(clock.clone());
        let a = ModelDescriptor::new("acct-a", "model-a", 1).with_limits(10, 1000);
        let b = ModelDescriptor::new("acct-b", "model-b", 1).with_limits(10, 1000);

        let mut ledger = QuotaLedger::new(QuotaPolicy::default(), shared);
        for _ in 0..9 {
            ledger.record_attempt(&b.key());
        }
        assert_eq!(ledger.status(&b), QuotaStatus::Limited);

        let client = Arc::new(ScriptedClient::new());
        client.push("model-a", InvokeOutcome::QuotaError("429 rate limit".to_string()));
        let router = ModelRouter::new(ledger, client.clone(), &RouterConfig::default());

        let ranked: Vec<_> = router
            .rank(TaskProfile::from_prompt("hi").complexity, &[b.clone(), a.clone()])
            .into_iter()
            .map(|c| c.descriptor.model_id)
            .collect();
        assert_eq!(ranked, vec!["model-a", "model-b"]);

        let result = router
            .route(&TaskProfile::from_prompt("hi"), &[b.clone(), a.clone()])
            .await
            .unwrap();
        assert_eq!(result.model_used, "model-b");
        assert_eq!(result.fallback_count, 1);
        assert_eq!(client.calls(), vec!["model-a@acct-a", "model-b@acct-b"]);
        assert_eq!(router.status_of(&a), QuotaStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_candidates_are_never_attempted() {
        let clock = ManualClock::new();
        let shared: SharedClock = Arc::new(clock.clone());
        let busy = ModelDescriptor::new("primary", "model-a", 1).with_limits(1000, 20);
        let spare = ModelDescriptor::new("primary", "model-b", 2);

        let mut ledger = QuotaLedger::new(QuotaPolicy::default(), shared);
        for _ in 0..19 {
            ledger.record_attempt(&busy.key());
        }
        assert_eq!(ledger.status(&busy), QuotaStatus::Exhausted);

        let client = Arc::new(ScriptedClient::new());
        client.push("model-b", InvokeOutcome::ProviderError("boom".to_string()));
        let router = ModelRouter::new(ledger, client.clone(), &RouterConfig::default());

        let err = router
            .route(&TaskProfile::from_prompt("hi"), &[busy, spare])
            .await
            .unwrap_err();
        assert!(matches!(err, OverseerError::AllCandidatesFailed { attempts: 1, .. }));
        assert_eq!(client.calls(), vec!["model-b@primary"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_window_relaxes() {
        let clock = ManualClock::new();
        let shared: SharedClock = Arc::new(clock.clone());
        let model = ModelDescriptor::new("primary", "model-a", 1).with_limits(10, 1000);
        let mut ledger = QuotaLedger::new(QuotaPolicy::default(), shared);
        for _ in 0..9 {
            ledger.record_attempt(&model.key());
        }
        assert_eq!(ledger.status(&model), QuotaStatus::Limited);

        clock.advance(Duration::from_secs(61));
        assert_eq!(ledger.status(&model), QuotaStatus::Available);
    }
}

mod pool_tests {
    use super::*;

    #[tokio::test]
    async fn test_idle_general_agents_are_cleaned_up() {
        let config = PoolConfig::default().with_idle_timeout(AgentKind::General, Duration::from_secs(1));
        let h = harness(config, SupervisorConfig::default());

        for n in 0..3 {
            h.pool
                .request_spawn("general", format!("task {}", n), "/home", None)
                .unwrap();
        }
        assert_eq!(h.pool.process_pending().await, 3);
        assert_eq!(h.pool.len(), 3);

        h.clock.advance(Duration::from_secs(2));
        assert_eq!(h.pool.cleanup(), 3);
        assert_eq!(h.pool.len(), 0);
    }

    #[tokio::test]
    async fn test_capacity_is_never_exceeded() {
        let h = harness(PoolConfig::default().with_max_agents(2), SupervisorConfig::default());
        h.pool.request_spawn("coder", "a", "/", None).unwrap();
        h.pool.request_spawn("coder", "b", "/", None).unwrap();

        let err = h.pool.request_spawn("coder", "c", "/", None).unwrap_err();
        assert!(matches!(
            err,
            OverseerError::CapacityExceeded { max_agents: 2, cleaned: 0 }
        ));

        h.pool.process_pending().await;
        assert_eq!(h.pool.len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_errors_terminate_agent() {
        let h = harness(PoolConfig::default(), SupervisorConfig::default());
        let id = h.pool.request_spawn("qa", "check", "/", None).unwrap();
        h.pool.process_pending().await;

        for _ in 0..5 {
            assert!(!h.pool.record_error(&id, json!({"message": "flaky"})).unwrap());
        }
        assert!(h.pool.record_error(&id, json!({"message": "flaky"})).unwrap());
        assert!(h.pool.get_info(&id).is_none());
    }

    #[tokio::test]
    async fn test_double_terminate_publishes_once() {
        let mut h = harness(PoolConfig::default(), SupervisorConfig::default());
        let id = h.pool.request_spawn("monitor", "watch", "/", None).unwrap();
        h.pool.process_pending().await;

        assert!(h.pool.terminate(&id, "manual"));
        assert!(!h.pool.terminate(&id, "manual"));
        h.supervisor.drain().await;

        let terminated = h
            .handle
            .recent_events(100)
            .iter()
            .filter(|e| e.event_type == AGENT_TERMINATED)
            .count();
        assert_eq!(terminated, 1);
    }
}

mod supervisor_tests {
    use super::*;

    #[tokio::test]
    async fn test_agent_error_produces_one_intervention() {
        let mut h = harness(PoolConfig::default(), SupervisorConfig::default());
        let id = h.pool.request_spawn("coder", "fix", "/editor", None).unwrap();
        h.pool.process_pending().await;
        h.supervisor.drain().await;

        h.pool.record_error(&id, json!({"message": "timeout"})).unwrap();
        h.supervisor.drain().await;

        let interventions = h.handle.interventions();
        assert_eq!(interventions.len(), 1);
        assert_eq!(interventions[0].issue_type, IssueType::AgentError);
        assert_eq!(interventions[0].agent_id.as_deref(), Some(id.as_str()));
        assert_eq!(h.handle.metrics().interventions_made, 1);
    }

    #[tokio::test]
    async fn test_error_after_quiet_period_is_recovered_once() {
        let mut h = harness(PoolConfig::default(), SupervisorConfig::default());
        let id = h.pool.request_spawn("coder", "fix", "/editor", None).unwrap();
        h.pool.process_pending().await;
        h.supervisor.drain().await;

        h.clock.advance(Duration::from_secs(6 * 60));
        h.pool.record_error(&id, json!({"message": "timeout"})).unwrap();
        h.supervisor.drain().await;

        let interventions = h.handle.interventions();
        assert_eq!(interventions.len(), 1);
        assert_eq!(interventions[0].issue_type, IssueType::AgentError);
        let agent = h.pool.get_info(&id).unwrap();
        assert_eq!(agent.status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn test_busy_after_quiet_period_keeps_agent() {
        let mut h = harness(PoolConfig::default(), SupervisorConfig::default());
        let id = h.pool.request_spawn("coder", "fix", "/editor", None).unwrap();
        h.pool.process_pending().await;
        h.supervisor.drain().await;

        h.clock.advance(Duration::from_secs(6 * 60));
        h.pool.set_status(&id, AgentStatus::Busy).unwrap();
        h.supervisor.drain().await;

        assert!(h.handle.interventions().is_empty());
        assert_eq!(h.pool.get_info(&id).unwrap().status, AgentStatus::Busy);
    }

    #[tokio::test]
    async fn test_busy_agent_heartbeat_after_silence_is_stuck() {
        let mut h = harness(PoolConfig::default(), SupervisorConfig::default());
        let id = h.pool.request_spawn("coder", "fix", "/editor", None).unwrap();
        h.pool.process_pending().await;
        h.pool.set_status(&id, AgentStatus::Busy).unwrap();
        h.supervisor.drain().await;

        h.clock.advance(Duration::from_secs(6 * 60));
        h.pool.set_status(&id, AgentStatus::Idle).unwrap();
        h.supervisor.drain().await;

        let interventions = h.handle.interventions();
        assert_eq!(interventions.len(), 1);
        assert_eq!(interventions[0].issue_type, IssueType::AgentStuck);
        assert_eq!(interventions[0].agent_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_malformed_event_is_never_stored_or_dispatched() {
        let mut h = harness(PoolConfig::default(), SupervisorConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        h.supervisor.register_handler(
            "page:view",
            handler_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let draft = EventDraft {
            event_type: None,
            source: Some("web".to_string()),
            payload: json!({"page": "/"}),
        };
        assert!(matches!(h.handle.publish(draft), Err(OverseerError::MalformedEvent(_))));
        assert_eq!(h.supervisor.drain().await, 0);
        assert_eq!(h.handle.history_len(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_history_eviction_is_fifo() {
        let mut h = harness(
            PoolConfig::default(),
            SupervisorConfig {
                history_capacity: 4,
                ..Default::default()
            },
        );
        let mut ids = Vec::new();
        for n in 0..10 {
            ids.push(
                h.handle
                    .publish(EventDraft::new("page:view", "web").with_payload(json!({"page": format!("/{}", n)})))
                    .unwrap(),
            );
            h.supervisor.drain().await;
            assert!(h.handle.history_len() <= 4);
        }

        let kept: Vec<_> = h.handle.recent_events(10).into_iter().map(|e| e.id).collect();
        assert_eq!(kept, ids[6..].to_vec());
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_processing() {
        let mut h = harness(PoolConfig::default(), SupervisorConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        h.supervisor
            .register_handler("page:view", handler_fn(|_| panic!("handler bug")));
        h.supervisor.register_handler(
            "page:view",
            handler_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        for _ in 0..3 {
            h.handle.publish(EventDraft::new("page:view", "web")).unwrap();
        }
        assert_eq!(h.supervisor.drain().await, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.handle.metrics().events_processed, 3);
        assert_eq!(h.handle.metrics().handler_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_uses_router() {
        let h = harness(PoolConfig::default(), SupervisorConfig::default());
        h.client.push(
            "gemini-2.0-flash",
            InvokeOutcome::Ok("You are on the home page".to_string()),
        );

        let response = h.handle.query("where am I?", "/home", Some("s1")).await;
        assert!(response.intervention_available);
        assert_eq!(response.response_text, "You are on the home page");
        assert_eq!(h.router.status_of(&ModelDescriptor::new("primary", "gemini-2.0-flash", 1)), QuotaStatus::Available);
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_sample_config_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("overseer").join("config.yaml");

        OverseerConfig::sample().save(&path).unwrap();
        let loaded = OverseerConfig::load(&path).unwrap();

        assert!(validate_config(&loaded).is_ok());
        assert_eq!(loaded.candidates.len(), 2);
        assert_eq!(loaded.accounts[0].id, "primary");
    }
}
