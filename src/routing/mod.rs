//! Model routing
//!
//! Selects an (account, model) candidate for each request, calls it through a
//! [`ModelEndpointClient`], records the outcome in the quota ledger and fails
//! over down a priority-ordered list.
//!
//! # Selection
//!
//! 1. Drop candidates that are Exhausted or in Error
//! 2. Sort by `(priority_tier, limited_penalty)`
//! 3. Move the best candidate of the preferred class to the front
//!    (pro models for complex tasks, fast models for quick ones)
//! 4. Attempt each in turn; at most one attempt per candidate
//!
//! A shared [`AdaptiveDelay`] spaces out attempts and adapts to how much
//! failover recent routes needed.
//!
//! # Example
//!
//! ```ignore
//! use overseer::routing::{ModelRouter, TaskProfile};
//!
//! let result = router.route(&TaskProfile::from_prompt("Summarize this page"), &candidates).await?;
//! println!("{} answered after {} fallbacks", result.model_used, result.fallback_count);
//! ```

mod backoff;
mod client;
mod router;
pub mod testing;

pub use backoff::{AdaptiveDelay, RouterConfig};
pub use client::{
    is_quota_message, Credential, InvokeOutcome, InvokeParams, LoopbackClient, ModelEndpointClient,
};
pub use router::{Complexity, ModelRouter, RankedCandidate, RouteResult, TaskProfile};
