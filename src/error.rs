//! Error types for Overseer
//!
//! Defines the error taxonomy shared by the router, the agent pool and the
//! supervisor. Uses thiserror for ergonomic error handling.

use thiserror::Error;

/// Result type alias for Overseer operations
pub type Result<T> = std::result::Result<T, OverseerError>;

/// Comprehensive error type for Overseer operations
#[derive(Error, Debug)]
pub enum OverseerError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A provider rejected a call because a quota was hit.
    /// Recoverable: the router fails over to the next candidate.
    #[error("Quota exceeded for {model} on account {account}: {message}")]
    QuotaExceeded {
        account: String,
        model: String,
        message: String,
    },

    /// Any other provider failure.
    /// Recoverable until the candidate is marked unhealthy.
    #[error("Provider error from {model} on account {account}: {message}")]
    Provider {
        account: String,
        model: String,
        message: String,
    },

    /// Every selectable candidate was attempted and failed (terminal per route call)
    #[error("All candidates failed after {attempts} attempt(s)")]
    AllCandidatesFailed {
        attempts: usize,
        warnings: Vec<String>,
    },

    /// The agent pool is full and a cleanup pass freed nothing (terminal per spawn request)
    #[error("Agent limit reached ({max_agents}); cleanup freed {cleaned} agent(s)")]
    CapacityExceeded { max_agents: usize, cleaned: usize },

    /// An event was rejected at the publish boundary
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// A registered event handler failed; caught per handler, never propagated by the loop
    #[error("Handler for '{event_type}' failed: {message}")]
    Handler { event_type: String, message: String },

    /// Agent not found in the pool
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// A status change that the agent state machine does not allow
    #[error("Agent {agent_id} cannot move from {from} to {to}")]
    InvalidTransition {
        agent_id: String,
        from: String,
        to: String,
    },

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Anyhow errors (for more context)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl OverseerError {
    /// Whether the router should move on to the next candidate after this error
    pub fn is_failover(&self) -> bool {
        matches!(
            self,
            OverseerError::QuotaExceeded { .. } | OverseerError::Provider { .. }
        )
    }
}
