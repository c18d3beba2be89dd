//! Provider boundary
//!
//! Any provider that can turn a prompt into text implements
//! [`ModelEndpointClient`]. Failures come back as data, not as errors, so the
//! router can branch on the kind of failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Secret material for one billing account
#[derive(Clone)]
pub struct Credential {
    pub account_id: String,
    secret: Option<String>,
}

impl Credential {
    pub fn new(account_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            secret: Some(secret.into()),
        }
    }

    /// Credential with no secret, for providers that do not need one
    pub fn anonymous(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            secret: None,
        }
    }

    /// Read the secret from an environment variable; missing variables yield an anonymous credential
    pub fn from_env(account_id: impl Into<String>, var: &str) -> Self {
        let account_id = account_id.into();
        match std::env::var(var) {
            Ok(secret) if !secret.is_empty() => Self::new(account_id, secret),
            _ => {
                tracing::warn!(account = %account_id, var, "Credential variable not set");
                Self::anonymous(account_id)
            }
        }
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("account_id", &self.account_id)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Generation parameters passed through to the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeParams {
    pub temperature: Option<f32>,
    pub max_output: Option<u32>,
}

/// Result of one provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeOutcome {
    /// Generated text
    Ok(String),
    /// The provider refused because a quota or rate limit was hit
    QuotaError(String),
    /// Any other failure
    ProviderError(String),
}

impl InvokeOutcome {
    /// Classify a raw provider error message
    pub fn from_provider_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_quota_message(&message) {
            Self::QuotaError(message)
        } else {
            Self::ProviderError(message)
        }
    }
}

/// Whether a provider error message describes a quota or rate-limit rejection
pub fn is_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("quota")
        || lower.contains("429")
        || lower.contains("rate limit")
        || lower.contains("resource_exhausted")
        || lower.contains("exceeded")
}

/// A model provider the router can call
#[async_trait]
pub trait ModelEndpointClient: Send + Sync {
    async fn invoke(
        &self,
        credential: &Credential,
        model_id: &str,
        prompt: &str,
        params: &InvokeParams,
    ) -> InvokeOutcome;
}

/// Provider that answers every prompt with a short echo; used for dry runs
#[derive(Debug, Clone, Default)]
pub struct LoopbackClient;

#[async_trait]
impl ModelEndpointClient for LoopbackClient {
    async fn invoke(
        &self,
        credential: &Credential,
        model_id: &str,
        prompt: &str,
        _params: &InvokeParams,
    ) -> InvokeOutcome {
        let head: String = prompt.trim().chars().take(160).collect();
        InvokeOutcome::Ok(format!(
            "[{}@{}] {}",
            model_id, credential.account_id, head
        ))
    }
}
