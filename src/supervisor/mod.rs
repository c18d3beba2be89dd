//! Supervisor
//!
//! Consumes the event bus in order, keeps a bounded history and a global
//! context projection, dispatches registered handlers and runs interventions
//! when the policy table flags an event. Busy agents that stop reporting are
//! found by a periodic sweep and reported as `agent:stuck`.

mod analyzer;
mod context;
mod engine;
mod handler;
mod intervention;
mod policy;

pub use analyzer::{parse_analysis, AnalyzerKind, HeuristicAnalyzer, IssueAnalyzer, ModelAnalyzer};
pub use context::{
    AgentMirror, ContextSnapshot, GlobalContext, JourneyEntry, PageActivity, SessionInfo,
};
pub use engine::{
    QueryResponse, Services, Supervisor, SupervisorCommand, SupervisorConfig, SupervisorHandle,
    SupervisorMetrics, SystemHealth, SUPERVISOR_SOURCE,
};
pub use handler::{handler_fn, EventHandler, FnHandler};
pub use intervention::{Analysis, InterventionRecord, IssueContext, IssueType, Strategy};
pub use policy::{assess, PolicyThresholds};
