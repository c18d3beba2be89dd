//! Intervention policy table
//!
//! Decides, per event type, whether a processed event should start an
//! intervention.

use super::context::AgentMirror;
use super::intervention::IssueContext;
use crate::pool::AgentStatus;
use crate::bus::{
    GlobalEvent, AGENT_ERROR, AGENT_HEARTBEAT, AGENT_STUCK, MEMORY_LEAK, SYSTEM_ALERT,
    SYSTEM_PERFORMANCE,
};
use crate::clock::elapsed_between;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

/// Thresholds the table consults
#[derive(Debug, Clone, Copy)]
pub struct PolicyThresholds {
    pub stale_after: Duration,
    pub slow_response_ms: u64,
}

/// The issue an event should be escalated as, if any
///
/// `previous` is the agent mirror as it stood before the event was applied.
pub fn assess(
    event: &GlobalEvent,
    previous: Option<&AgentMirror>,
    thresholds: PolicyThresholds,
    now: DateTime<Utc>,
) -> Option<IssueContext> {
    match event.event_type.as_str() {
        AGENT_ERROR | AGENT_STUCK | MEMORY_LEAK => Some(IssueContext::from_event(event)),
        AGENT_HEARTBEAT => stale_heartbeat(event, previous?, thresholds.stale_after, now),
        SYSTEM_ALERT => {
            let level = event.payload_str("level").unwrap_or("info");
            matches!(level, "error" | "critical").then(|| IssueContext::from_event(event))
        }
        SYSTEM_PERFORMANCE => {
            let response_ms = response_time_ms(event)?;
            (response_ms > thresholds.slow_response_ms as f64)
                .then(|| IssueContext::from_event(event))
        }
        _ => None,
    }
}

/// Response time from `response_time_ms`, or the older `metrics.response_time` shape
fn response_time_ms(event: &GlobalEvent) -> Option<f64> {
    event.payload_f64("response_time_ms").or_else(|| {
        event
            .payload
            .get("metrics")
            .and_then(|m| m.get("response_time"))
            .and_then(Value::as_f64)
    })
}

/// A heartbeat ending a silence longer than the staleness window while the agent was busy
///
/// Idle, active and errored agents are expected to go quiet. A busy agent
/// already reported by the sweep is not escalated twice.
fn stale_heartbeat(
    event: &GlobalEvent,
    previous: &AgentMirror,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Option<IssueContext> {
    if previous.status != AgentStatus::Busy || previous.stuck_reported {
        return None;
    }

    let agent_id = event.agent_id()?;
    let silent_for = elapsed_between(previous.last_heartbeat, now);
    (silent_for > stale_after).then(|| {
        IssueContext::stuck_agent(
            agent_id,
            previous.last_heartbeat,
            silent_for,
            Some(event.id.clone()),
        )
    })
}
