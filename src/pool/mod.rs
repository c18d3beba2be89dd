//! Agent pool
//!
//! Bounded registry of on-demand agents.
//!
//! # Lifecycle
//!
//! 1. [`AgentPool::request_spawn`] checks capacity and queues a job, returning
//!    the new id at once
//! 2. The spawn worker takes jobs one at a time, picks a model for the agent's
//!    kind through the router, marks it Active and publishes `agent:spawned`
//! 3. Activity and status changes publish `agent:heartbeat`
//! 4. The cleanup worker terminates agents that idled past their timeout or
//!    accumulated too many errors, publishing `agent:terminated`
//!
//! The capacity cap is the system's only intake backpressure: requests are
//! rejected, never queued without bound.

mod agent;
mod manager;
mod template;

pub use agent::{AgentConfig, AgentRecord, AgentStatus};
pub use manager::{AgentPool, PoolConfig, PoolStats, POOL_SOURCE};
pub use template::{AgentKind, AgentTemplate};
