//! Configuration system
//!
//! Loads ~/.config/overseer/config.yaml with support for:
//! - Billing accounts whose API keys come from environment variables
//! - Candidate (account, model) pairs with their provider limits
//! - Quota, router, pool and supervisor tunables

mod account;
mod overseer_config;
pub mod validation;

pub use account::AccountConfig;
pub use overseer_config::OverseerConfig;
pub use validation::{validate_config, validate_config_result, ValidationError};
