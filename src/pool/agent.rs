//! Agent records and lifecycle states
//!
//! An [`AgentRecord`] is owned by the pool. Everyone else sees clones of it, or
//! the heartbeat and lifecycle events the pool publishes.

use super::template::{AgentKind, AgentTemplate};
use crate::clock::{ceil_secs, elapsed_between, format_duration};
use crate::quota::{ModelClass, ModelDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;

/// Agent lifecycle status
///
/// `Initializing → Active ⇄ {Idle, Busy} → Terminated`, with `Error`
/// reachable from any live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Active,
    Idle,
    Busy,
    Error,
    Terminated,
}

impl AgentStatus {
    /// Parse a status name as it appears in event payloads
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "initializing" => Some(Self::Initializing),
            "active" => Some(Self::Active),
            "idle" => Some(Self::Idle),
            "busy" => Some(Self::Busy),
            "error" => Some(Self::Error),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Terminated => "terminated",
        }
    }

    /// Serving work or ready to
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Idle | Self::Busy)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (a, b) if *a == b => true,
            (Initializing, Active | Error) => true,
            (Active | Idle | Busy, Active | Idle | Busy | Error) => true,
            // Recovery puts an errored agent back into service
            (Error, Active) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request overrides applied on top of the kind's template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Idle timeout in seconds
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    #[serde(default)]
    pub model_class: Option<ModelClass>,

    #[serde(default)]
    pub max_tasks: Option<u32>,

    /// Free-form data carried with the agent
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored in whole seconds, rounded up
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_secs = Some(ceil_secs(timeout));
        self
    }

    pub fn with_model_class(mut self, class: ModelClass) -> Self {
        self.model_class = Some(class);
        self
    }

    pub fn with_max_tasks(mut self, max_tasks: u32) -> Self {
        self.max_tasks = Some(max_tasks);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A pooled agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub kind: AgentKind,
    pub purpose: String,
    pub page_context: String,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub task_count: u32,
    pub error_count: u32,
    pub config: AgentConfig,

    /// Effective values after applying `config` to the template
    pub capabilities: Vec<String>,
    pub idle_timeout: Duration,
    pub max_tasks: u32,

    /// Candidate assigned at initialization
    pub model_id: String,
    pub account_id: String,

    /// Latest task info reported with activity
    pub metrics: Map<String, Value>,
}

impl AgentRecord {
    /// Build an initialized record from a template and the assigned candidate
    pub fn new(
        agent_id: impl Into<String>,
        template: &AgentTemplate,
        purpose: impl Into<String>,
        page_context: impl Into<String>,
        config: AgentConfig,
        model: &ModelDescriptor,
        now: DateTime<Utc>,
    ) -> Self {
        let idle_timeout = config
            .idle_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(template.idle_timeout);
        let max_tasks = config.max_tasks.unwrap_or(template.max_tasks);

        Self {
            agent_id: agent_id.into(),
            kind: template.kind,
            purpose: purpose.into(),
            page_context: page_context.into(),
            status: AgentStatus::Initializing,
            created_at: now,
            last_activity: now,
            task_count: 0,
            error_count: 0,
            config,
            capabilities: template.capabilities.iter().map(|c| c.to_string()).collect(),
            idle_timeout,
            max_tasks,
            model_id: model.model_id.clone(),
            account_id: model.account_id.clone(),
            metrics: Map::new(),
        }
    }

    /// Time since the last recorded activity
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.last_activity, now)
    }

    /// Time since creation
    pub fn lifetime(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.created_at, now)
    }

    /// Whether the idle timeout has passed; busy agents never idle out
    pub fn is_idle_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, AgentStatus::Active | AgentStatus::Idle)
            && self.idle_for(now) > self.idle_timeout
    }

    /// Payload of an `agent:heartbeat` event
    pub fn heartbeat_payload(&self) -> Value {
        json!({
            "agent_id": self.agent_id,
            "agent_type": self.kind,
            "status": self.status,
            "task_count": self.task_count,
            "error_count": self.error_count,
            "last_activity": self.last_activity.to_rfc3339(),
            "metrics": self.metrics,
        })
    }

    /// Summary attached to `agent:terminated`
    pub fn final_metrics(&self, now: DateTime<Utc>) -> Value {
        json!({
            "task_count": self.task_count,
            "error_count": self.error_count,
            "lifetime": format_duration(self.lifetime(now)),
            "model": self.model_id,
            "account": self.account_id,
            "metrics": self.metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(now: DateTime<Utc>) -> AgentRecord {
        AgentRecord::new(
            "general-1",
            &AgentKind::General.template(),
            "answer questions",
            "/dashboard",
            AgentConfig::new(),
            &ModelDescriptor::new("primary", "gemini-2.0-flash", 1),
            now,
        )
    }

    #[test]
    fn test_state_machine() {
        use AgentStatus::*;
        assert!(Initializing.can_transition_to(Active));
        assert!(!Initializing.can_transition_to(Busy));
        assert!(Active.can_transition_to(Busy));
        assert!(Busy.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Error));
        assert!(Error.can_transition_to(Active));
        assert!(!Error.can_transition_to(Busy));
        assert!(Busy.can_transition_to(Terminated));
        assert!(!Terminated.can_transition_to(Active));
        assert!(!Terminated.can_transition_to(Terminated));
    }

    #[test]
    fn test_status_names() {
        for status in [
            AgentStatus::Initializing,
            AgentStatus::Active,
            AgentStatus::Idle,
            AgentStatus::Busy,
            AgentStatus::Error,
            AgentStatus::Terminated,
        ] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AgentStatus::parse("sleeping"), None);
    }

    #[test]
    fn test_config_overrides_template() {
        let now = Utc::now();
        let record = AgentRecord::new(
            "coder-1",
            &AgentKind::Coder.template(),
            "fix bug",
            "/editor",
            AgentConfig::new()
                .with_idle_timeout(Duration::from_secs(10))
                .with_max_tasks(3),
            &ModelDescriptor::new("primary", "gemini-2.5-pro", 1),
            now,
        );
        assert_eq!(record.idle_timeout, Duration::from_secs(10));
        assert_eq!(record.max_tasks, 3);
        assert_eq!(record.model_id, "gemini-2.5-pro");
        assert!(record.capabilities.contains(&"code_generation".to_string()));
    }

    #[test]
    fn test_idle_expiry_skips_busy_agents() {
        let now = Utc::now();
        let mut record = record(now);
        record.status = AgentStatus::Active;
        let later = now + chrono::Duration::minutes(31);
        assert!(record.is_idle_expired(later));

        record.status = AgentStatus::Busy;
        assert!(!record.is_idle_expired(later));

        record.status = AgentStatus::Idle;
        assert!(!record.is_idle_expired(now + chrono::Duration::minutes(29)));
    }

    #[test]
    fn test_heartbeat_payload() {
        let record = record(Utc::now());
        let payload = record.heartbeat_payload();
        assert_eq!(payload["agent_id"], "general-1");
        assert_eq!(payload["status"], "initializing");
        assert_eq!(payload["agent_type"], "general");
    }
}
