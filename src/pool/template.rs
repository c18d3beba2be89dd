//! Agent kinds and their templates

use crate::quota::ModelClass;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kind of agent; decides capabilities, model class and lifetime limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    General,
    Specialist,
    Researcher,
    Coder,
    Designer,
    Qa,
    Monitor,
    Optimizer,
    Security,
    Analytics,
}

/// Static defaults for one agent kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentTemplate {
    pub kind: AgentKind,
    pub capabilities: &'static [&'static str],
    pub model_class: ModelClass,
    pub max_tasks: u32,
    pub idle_timeout: Duration,
}

const fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

impl AgentKind {
    pub const ALL: [AgentKind; 10] = [
        Self::General,
        Self::Specialist,
        Self::Researcher,
        Self::Coder,
        Self::Designer,
        Self::Qa,
        Self::Monitor,
        Self::Optimizer,
        Self::Security,
        Self::Analytics,
    ];

    /// Parse a kind name; unknown names fall back to [`AgentKind::General`]
    pub fn resolve(name: &str) -> Self {
        Self::parse(name).unwrap_or_else(|| {
            tracing::warn!(kind = name, "Unknown agent kind, using general");
            Self::General
        })
    }

    /// Parse a kind name exactly
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Specialist => "specialist",
            Self::Researcher => "researcher",
            Self::Coder => "coder",
            Self::Designer => "designer",
            Self::Qa => "qa",
            Self::Monitor => "monitor",
            Self::Optimizer => "optimizer",
            Self::Security => "security",
            Self::Analytics => "analytics",
        }
    }

    /// Template for this kind
    pub fn template(&self) -> AgentTemplate {
        AgentTemplate {
            kind: *self,
            capabilities: self.capabilities(),
            model_class: self.model_class(),
            max_tasks: self.max_tasks(),
            idle_timeout: self.idle_timeout(),
        }
    }

    fn capabilities(&self) -> &'static [&'static str] {
        match self {
            Self::General => &["general_assistance", "task_routing", "context_awareness"],
            Self::Specialist => &["deep_analysis", "specialized_knowledge", "expert_advice"],
            Self::Researcher => &["web_search", "data_analysis", "report_generation"],
            Self::Coder => &["code_generation", "debugging", "optimization"],
            Self::Designer => &["ui_design", "visual_analysis", "creative_assistance"],
            Self::Qa => &["testing", "quality_assurance", "validation"],
            Self::Monitor => &["system_monitoring", "health_checks", "alerting"],
            Self::Optimizer => &["performance_optimization", "resource_management"],
            Self::Security => &["security_analysis", "threat_detection", "compliance"],
            Self::Analytics => &["data_analysis", "metrics_collection", "insights"],
        }
    }

    fn model_class(&self) -> ModelClass {
        match self {
            Self::General | Self::Designer | Self::Qa | Self::Monitor => ModelClass::Fast,
            Self::Specialist
            | Self::Researcher
            | Self::Coder
            | Self::Optimizer
            | Self::Security
            | Self::Analytics => ModelClass::Pro,
        }
    }

    fn max_tasks(&self) -> u32 {
        match self {
            Self::General => 100,
            Self::Specialist => 50,
            Self::Researcher => 25,
            Self::Coder => 30,
            Self::Designer => 20,
            Self::Qa => 40,
            Self::Monitor => 1000,
            Self::Optimizer => 10,
            Self::Security => 15,
            Self::Analytics => 20,
        }
    }

    fn idle_timeout(&self) -> Duration {
        match self {
            Self::Monitor => minutes(5),
            Self::General | Self::Qa => minutes(30),
            Self::Researcher | Self::Coder => minutes(45),
            Self::Specialist | Self::Designer | Self::Analytics => minutes(60),
            Self::Security => minutes(90),
            Self::Optimizer => minutes(120),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
