//! Interventions: issue kinds, strategies and the record of each run

use crate::bus::{GlobalEvent, AGENT_ERROR, AGENT_STUCK, MEMORY_LEAK, SYSTEM_ALERT, SYSTEM_PERFORMANCE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

/// Confidence above which the automated strategy is chosen for agent issues
pub const AGGRESSIVE_CONFIDENCE: u8 = 80;

/// Kind of detected problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueType {
    #[serde(rename = "agent:error")]
    AgentError,
    #[serde(rename = "agent:stuck")]
    AgentStuck,
    #[serde(rename = "system:alert")]
    SystemAlert,
    #[serde(rename = "system:performance")]
    SystemPerformance,
    #[serde(rename = "memory:leak")]
    MemoryLeak,
    #[serde(rename = "unknown")]
    Unknown,
}

impl IssueType {
    /// Map an event type to an issue type; anything unrecognized is `Unknown`
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            AGENT_ERROR => Self::AgentError,
            AGENT_STUCK => Self::AgentStuck,
            SYSTEM_ALERT => Self::SystemAlert,
            SYSTEM_PERFORMANCE => Self::SystemPerformance,
            MEMORY_LEAK => Self::MemoryLeak,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentError => AGENT_ERROR,
            Self::AgentStuck => AGENT_STUCK,
            Self::SystemAlert => SYSTEM_ALERT,
            Self::SystemPerformance => SYSTEM_PERFORMANCE,
            Self::MemoryLeak => MEMORY_LEAK,
            Self::Unknown => "unknown",
        }
    }

    pub fn is_agent_issue(&self) -> bool {
        matches!(self, Self::AgentError | Self::AgentStuck)
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Corrective action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Put the agent back into service as it is
    SmartRecovery,
    /// Replace the agent with a fresh one of the same kind
    SafeRestart,
    /// Run a pool cleanup pass
    ResourceOptimization,
    /// Trim the supervisor's own projections
    MemoryCleanup,
    /// Capture state for a human
    DiagnosticCollection,
}

impl Strategy {
    /// Pick a strategy for an issue given the analysis confidence (0-100)
    pub fn select(issue: IssueType, confidence: u8) -> Self {
        match issue {
            IssueType::AgentError | IssueType::AgentStuck => {
                if confidence > AGGRESSIVE_CONFIDENCE {
                    Self::SmartRecovery
                } else {
                    Self::SafeRestart
                }
            }
            IssueType::SystemPerformance => Self::ResourceOptimization,
            IssueType::MemoryLeak => Self::MemoryCleanup,
            IssueType::SystemAlert | IssueType::Unknown => Self::DiagnosticCollection,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SmartRecovery => "smart_recovery",
            Self::SafeRestart => "safe_restart",
            Self::ResourceOptimization => "resource_optimization",
            Self::MemoryCleanup => "memory_cleanup",
            Self::DiagnosticCollection => "diagnostic_collection",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about an issue when the pipeline starts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueContext {
    pub issue_type: IssueType,
    pub agent_id: Option<String>,
    pub page_id: Option<String>,
    /// Event that triggered the intervention, if any
    pub trigger_event_id: Option<String>,
    pub detail: Value,
}

impl IssueContext {
    /// Issue described by an event
    pub fn from_event(event: &GlobalEvent) -> Self {
        Self {
            issue_type: IssueType::from_event_type(&event.event_type),
            agent_id: event.agent_id().map(str::to_string),
            page_id: event
                .payload_str("page")
                .or_else(|| event.payload_str("page_context"))
                .map(str::to_string),
            trigger_event_id: Some(event.id.clone()),
            detail: event.payload.clone(),
        }
    }

    /// An agent that stopped reporting
    pub fn stuck_agent(
        agent_id: impl Into<String>,
        last_heartbeat: DateTime<Utc>,
        silent_for: Duration,
        trigger_event_id: Option<String>,
    ) -> Self {
        let agent_id = agent_id.into();
        Self {
            issue_type: IssueType::AgentStuck,
            detail: json!({
                "agent_id": agent_id,
                "last_heartbeat": last_heartbeat.to_rfc3339(),
                "silent_for_secs": silent_for.as_secs(),
            }),
            agent_id: Some(agent_id),
            page_id: None,
            trigger_event_id,
        }
    }
}

/// Diagnosis with a confidence score from 0 to 100
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub diagnosis: String,
    pub confidence: u8,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl Analysis {
    pub fn new(diagnosis: impl Into<String>, confidence: u8) -> Self {
        Self {
            diagnosis: diagnosis.into(),
            confidence: confidence.min(100),
            recommendations: Vec::new(),
        }
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }
}

/// Append-only record of one intervention
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterventionRecord {
    pub id: String,
    pub issue_type: IssueType,
    pub agent_id: Option<String>,
    pub analysis: Analysis,
    pub strategy: Strategy,
    pub result: Value,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_selection() {
        assert_eq!(Strategy::select(IssueType::AgentError, 81), Strategy::SmartRecovery);
        assert_eq!(Strategy::select(IssueType::AgentError, 80), Strategy::SafeRestart);
        assert_eq!(Strategy::select(IssueType::AgentStuck, 95), Strategy::SmartRecovery);
        assert_eq!(
            Strategy::select(IssueType::SystemPerformance, 10),
            Strategy::ResourceOptimization
        );
        assert_eq!(Strategy::select(IssueType::MemoryLeak, 99), Strategy::MemoryCleanup);
        assert_eq!(
            Strategy::select(IssueType::Unknown, 99),
            Strategy::DiagnosticCollection
        );
    }

    #[test]
    fn test_issue_type_names() {
        assert_eq!(IssueType::from_event_type("agent:error"), IssueType::AgentError);
        assert_eq!(IssueType::from_event_type("agent:exploded"), IssueType::Unknown);
        assert_eq!(
            serde_json::to_value(IssueType::AgentError).unwrap(),
            "agent:error"
        );
        assert_eq!(serde_json::to_value(Strategy::SafeRestart).unwrap(), "safe_restart");
    }

    #[test]
    fn test_issue_from_event() {
        let event = GlobalEvent {
            id: "evt-9".to_string(),
            event_type: "agent:error".to_string(),
            source: "pool".to_string(),
            payload: json!({"agent_id": "qa-3", "page_context": "/checkout"}),
            timestamp: Utc::now(),
        };
        let issue = IssueContext::from_event(&event);
        assert_eq!(issue.issue_type, IssueType::AgentError);
        assert_eq!(issue.agent_id.as_deref(), Some("qa-3"));
        assert_eq!(issue.page_id.as_deref(), Some("/checkout"));
        assert_eq!(issue.trigger_event_id.as_deref(), Some("evt-9"));
    }

    #[test]
    fn test_analysis_confidence_is_capped() {
        assert_eq!(Analysis::new("x", 250).confidence, 100);
    }
}
