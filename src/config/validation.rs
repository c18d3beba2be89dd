//! Configuration validation
//!
//! Validates Overseer configuration for correctness:
//! - No duplicate accounts or (account, model) pairs
//! - Candidates reference a configured account
//! - Limits and capacities are non-zero
//! - Router delay bounds are ordered

use super::overseer_config::OverseerConfig;
use crate::quota::ModelDescriptor;
use crate::OverseerError;
use std::collections::HashSet;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Candidate or account the problem belongs to
    pub context: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref ctx) = self.context {
            write!(f, "[{}] {}: {}", ctx, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate an Overseer configuration
pub fn validate_config(config: &OverseerConfig) -> ValidationResult {
    let mut errors = Vec::new();

    let mut account_ids = HashSet::new();
    for account in &config.accounts {
        if account.id.trim().is_empty() {
            errors.push(ValidationError::new("accounts.id", "Account id cannot be empty"));
        } else if !account_ids.insert(account.id.as_str()) {
            errors.push(ValidationError::new(
                "accounts",
                format!("Duplicate account id: {}", account.id),
            ));
        }
    }

    if config.candidates.is_empty() {
        errors.push(ValidationError::new(
            "candidates",
            "At least one candidate must be defined",
        ));
    }

    let mut seen_pairs = HashSet::new();
    for candidate in &config.candidates {
        let key = candidate.key();
        if !seen_pairs.insert(key.clone()) {
            errors.push(ValidationError::new(
                "candidates",
                format!("Duplicate candidate: {}", key),
            ));
        }
        if !config.accounts.is_empty() && !account_ids.contains(candidate.account_id.as_str()) {
            errors.push(
                ValidationError::new(
                    "account_id",
                    format!("Unknown account '{}'", candidate.account_id),
                )
                .with_context(key.to_string()),
            );
        }
        errors.extend(validate_candidate(candidate));
    }

    if config.router.min_delay_ms > config.router.max_delay_ms {
        errors.push(ValidationError::new(
            "router.min_delay_ms",
            format!(
                "Minimum delay {}ms exceeds maximum delay {}ms",
                config.router.min_delay_ms, config.router.max_delay_ms
            ),
        ));
    }
    if config.router.growth < 1.0 {
        errors.push(ValidationError::new("router.growth", "Growth must be at least 1.0"));
    }
    if !(0.0..=1.0).contains(&config.router.decay) {
        errors.push(ValidationError::new("router.decay", "Decay must be between 0 and 1"));
    }

    if !(0.0..=1.0).contains(&config.quota.latency_smoothing) {
        errors.push(ValidationError::new(
            "quota.latency_smoothing",
            "Smoothing factor must be between 0 and 1",
        ));
    }
    if config.quota.unhealthy_after == 0 {
        errors.push(ValidationError::new(
            "quota.unhealthy_after",
            "Must be greater than 0",
        ));
    }

    if config.pool.max_agents == 0 {
        errors.push(ValidationError::new("pool.max_agents", "Must be greater than 0"));
    }
    if config.pool.cleanup_interval_secs == 0 {
        errors.push(ValidationError::new(
            "pool.cleanup_interval_secs",
            "Must be greater than 0",
        ));
    }

    if config.supervisor.history_capacity == 0 {
        errors.push(ValidationError::new(
            "supervisor.history_capacity",
            "Must be greater than 0",
        ));
    }
    if config.supervisor.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "supervisor.sweep_interval_secs",
            "Must be greater than 0",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_candidate(candidate: &ModelDescriptor) -> Vec<ValidationError> {
    let context = candidate.key().to_string();
    let mut errors = Vec::new();

    if candidate.model_id.trim().is_empty() {
        errors.push(ValidationError::new("model_id", "Model id cannot be empty").with_context(&context));
    }
    if candidate.rpm_limit == 0 {
        errors.push(ValidationError::new("rpm_limit", "Must be greater than 0").with_context(&context));
    }
    if candidate.rpd_limit == 0 {
        errors.push(ValidationError::new("rpd_limit", "Must be greater than 0").with_context(&context));
    }
    if candidate.rpd_limit < candidate.rpm_limit {
        errors.push(
            ValidationError::new(
                "rpd_limit",
                format!(
                    "Daily limit {} is below the per-minute limit {}",
                    candidate.rpd_limit, candidate.rpm_limit
                ),
            )
            .with_context(&context),
        );
    }
    if candidate.max_output_size == 0 {
        errors.push(
            ValidationError::new("max_output_size", "Must be greater than 0").with_context(&context),
        );
    }

    errors
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &OverseerConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        OverseerError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
