//! Quota-aware model router
//!
//! Ranks candidates by tier and quota pressure, calls the best one, and fails
//! over down the ranking until a call succeeds or the list runs out.

use super::backoff::{AdaptiveDelay, RouterConfig};
use super::client::{Credential, InvokeOutcome, InvokeParams, ModelEndpointClient};
use crate::metrics;
use crate::quota::{ModelClass, ModelDescriptor, QuotaLedger, QuotaSnapshot, QuotaStatus};
use crate::{OverseerError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// How demanding a task is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Model class that should be tried first, if any
    pub fn preferred_class(&self) -> Option<ModelClass> {
        match self {
            Self::Low => Some(ModelClass::Fast),
            Self::Medium => None,
            Self::High => Some(ModelClass::Pro),
        }
    }
}

/// What the caller wants done
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProfile {
    pub prompt: String,
    pub complexity: Complexity,
    #[serde(default)]
    pub params: InvokeParams,
}

impl TaskProfile {
    /// Derive complexity from prompt length: long prompts are complex, short ones are quick
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let length = prompt.chars().count();
        let complexity = if length > 1000 {
            Complexity::High
        } else if length < 500 {
            Complexity::Low
        } else {
            Complexity::Medium
        };

        Self {
            prompt,
            complexity,
            params: InvokeParams::default(),
        }
    }

    /// Override the inferred complexity
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    /// Reasoning-heavy tasks always go to the strongest models first
    pub fn requiring_reasoning(self) -> Self {
        self.with_complexity(Complexity::High)
    }

    pub fn with_params(mut self, params: InvokeParams) -> Self {
        self.params = params;
        self
    }
}

/// Outcome of a successful route call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteResult {
    pub content: String,
    pub model_used: String,
    pub account_used: String,
    /// Wall time of the whole route call, retries and delays included
    pub latency: Duration,
    /// Candidates attempted before the one that answered
    pub fallback_count: usize,
    pub warnings: Vec<String>,
}

/// A selectable candidate with the status it had when the ranking was made
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub descriptor: ModelDescriptor,
    pub status: QuotaStatus,
}

/// Routes requests across interchangeable (account, model) candidates
pub struct ModelRouter {
    ledger: Mutex<QuotaLedger>,
    client: Arc<dyn ModelEndpointClient>,
    credentials: HashMap<String, Credential>,
    delay: Mutex<AdaptiveDelay>,
}

impl ModelRouter {
    /// Create a router that owns the given ledger
    pub fn new(ledger: QuotaLedger, client: Arc<dyn ModelEndpointClient>, config: &RouterConfig) -> Self {
        Self {
            ledger: Mutex::new(ledger),
            client,
            credentials: HashMap::new(),
            delay: Mutex::new(AdaptiveDelay::new(config)),
        }
    }

    /// Register account credentials
    pub fn with_credentials(mut self, credentials: impl IntoIterator<Item = Credential>) -> Self {
        for credential in credentials {
            self.credentials
                .insert(credential.account_id.clone(), credential);
        }
        self
    }

    fn credential_for(&self, account_id: &str) -> Credential {
        self.credentials
            .get(account_id)
            .cloned()
            .unwrap_or_else(|| Credential::anonymous(account_id))
    }

    /// Selectable candidates in attempt order.
    ///
    /// Exhausted and Error candidates are dropped. The rest are sorted by
    /// `(priority_tier, penalty)`, keeping configuration order among equals,
    /// and the best candidate of the complexity's preferred class is moved to
    /// the front.
    pub fn rank(&self, complexity: Complexity, candidates: &[ModelDescriptor]) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = {
            let ledger = self.ledger.lock();
            candidates
                .iter()
                .filter_map(|descriptor| {
                    let status = ledger.status(descriptor);
                    status.is_selectable().then(|| RankedCandidate {
                        descriptor: descriptor.clone(),
                        status,
                    })
                })
                .collect()
        };

        ranked.sort_by_key(|c| (c.descriptor.priority_tier, c.status.penalty()));

        if let Some(preferred) = complexity.preferred_class() {
            if let Some(pos) = ranked
                .iter()
                .position(|c| c.descriptor.model_class() == preferred)
            {
                let promoted = ranked.remove(pos);
                ranked.insert(0, promoted);
            }
        }

        ranked
    }

    /// Best selectable candidate of a class, or the best selectable candidate of any class
    pub fn preferred_candidate(
        &self,
        class: ModelClass,
        candidates: &[ModelDescriptor],
    ) -> Option<ModelDescriptor> {
        let ranked = self.rank(Complexity::Medium, candidates);
        ranked
            .iter()
            .find(|c| c.descriptor.model_class() == class)
            .or_else(|| ranked.first())
            .map(|c| c.descriptor.clone())
    }

    /// Route one task, failing over across the candidates
    pub async fn route(&self, profile: &TaskProfile, candidates: &[ModelDescriptor]) -> Result<RouteResult> {
        let started = Instant::now();
        let restored = self.ledger.lock().recover_stale_health();
        if restored > 0 {
            debug!(restored, "Candidates returned to service");
        }

        let ranked = self.rank(profile.complexity, candidates);
        let mut warnings = Vec::new();

        if ranked.is_empty() {
            warn!(
                candidates = candidates.len(),
                "No selectable candidates for route"
            );
        }

        for (attempt, candidate) in ranked.iter().enumerate() {
            if attempt > 0 {
                let pause = self.delay.lock().current();
                sleep(pause).await;
            }

            let descriptor = &candidate.descriptor;
            let key = descriptor.key();
            if candidate.status == QuotaStatus::Limited {
                warnings.push(format!("{} is close to its quota", key));
            }

            let params = InvokeParams {
                max_output: Some(
                    profile
                        .params
                        .max_output
                        .map_or(descriptor.max_output_size, |m| m.min(descriptor.max_output_size)),
                ),
                ..profile.params.clone()
            };
            let credential = self.credential_for(&descriptor.account_id);

            self.ledger.lock().record_attempt(&key);
            info!(
                model = %descriptor.model_id,
                account = %descriptor.account_id,
                attempt = attempt + 1,
                "Attempting route"
            );

            let call_started = Instant::now();
            let outcome = self
                .client
                .invoke(&credential, &descriptor.model_id, &profile.prompt, &params)
                .await;
            let call_latency = call_started.elapsed();

            let failure = match outcome {
                InvokeOutcome::Ok(content) => {
                    self.ledger.lock().record_success(&key, call_latency);
                    self.delay.lock().record_route(attempt, true);
                    metrics::record_route_attempt(&descriptor.model_id, "success");
                    metrics::observe_route_latency(&descriptor.model_id, call_latency.as_secs_f64());

                    return Ok(RouteResult {
                        content,
                        model_used: descriptor.model_id.clone(),
                        account_used: descriptor.account_id.clone(),
                        latency: started.elapsed(),
                        fallback_count: attempt,
                        warnings,
                    });
                }
                InvokeOutcome::QuotaError(message) => {
                    self.ledger.lock().record_quota_error(&key);
                    metrics::record_route_attempt(&descriptor.model_id, "quota_error");
                    OverseerError::QuotaExceeded {
                        account: descriptor.account_id.clone(),
                        model: descriptor.model_id.clone(),
                        message,
                    }
                }
                InvokeOutcome::ProviderError(message) => {
                    self.ledger.lock().record_failure(&key);
                    metrics::record_route_attempt(&descriptor.model_id, "provider_error");
                    OverseerError::Provider {
                        account: descriptor.account_id.clone(),
                        model: descriptor.model_id.clone(),
                        message,
                    }
                }
            };

            warn!(candidate = %key, error = %failure, "Route attempt failed, failing over");
            warnings.push(failure.to_string());
        }

        self.delay.lock().record_route(ranked.len(), false);
        Err(OverseerError::AllCandidatesFailed {
            attempts: ranked.len(),
            warnings,
        })
    }

    /// Status of each candidate with its counters
    pub fn snapshot(&self, candidates: &[ModelDescriptor]) -> Vec<QuotaSnapshot> {
        self.ledger.lock().snapshot(candidates)
    }

    /// Current status of one candidate
    pub fn status_of(&self, descriptor: &ModelDescriptor) -> QuotaStatus {
        self.ledger.lock().status(descriptor)
    }

    /// Current inter-attempt delay
    pub fn current_delay(&self) -> Duration {
        self.delay.lock().current()
    }
}
