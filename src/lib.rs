//! Overseer - quota-aware model routing, bounded agent pools and an
//! event-driven supervisor
//!
//! Overseer spreads model calls over several provider accounts without
//! tripping their rate limits, keeps a bounded pool of agents that are created
//! and reaped on demand, and watches everything through a single ordered event
//! stream that triggers automatic interventions.
//!
//! # Architecture
//!
//! - **quota**: Per-(account, model) rate windows, cooldowns and health
//! - **routing**: Candidate ranking and failover over a provider client
//! - **pool**: Agent templates, registry, spawn and cleanup workers
//! - **bus**: Validated event ingestion and bounded history
//! - **supervisor**: Context projection, handlers and the intervention pipeline
//! - **runtime**: Wires the components together and runs the background tasks
//! - **transport**: JSON-lines input and broadcast output
//! - **config**: YAML configuration and validation

// Core modules
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

// Components
pub mod bus;
pub mod pool;
pub mod quota;
pub mod routing;
pub mod supervisor;

// Wiring
pub mod runtime;
pub mod transport;

// Re-exports
pub use error::{OverseerError, Result};
