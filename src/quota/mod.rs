//! Quota tracking
//!
//! Rolling per-(account, model) usage counters with health and cooldown state.
//!
//! # Status rules
//!
//! - **Error**: unhealthy, too many consecutive failures, or inside a cooldown
//! - **Exhausted**: day count at or above 95% of the daily limit
//! - **Limited**: day count at or above 80%, or minute count at or above 90%
//! - **Available**: everything else
//!
//! Windows reset lazily: a minute (or day) after the window opened, the next
//! access sees a zero count.

mod descriptor;
mod ledger;

pub use descriptor::{CandidateKey, ModelClass, ModelDescriptor};
pub use ledger::{
    QuotaCounter, QuotaLedger, QuotaPolicy, QuotaSnapshot, QuotaStatus, DAY_WINDOW, MINUTE_WINDOW,
};
