//! Static candidate configuration
//!
//! A [`ModelDescriptor`] names one (account, model) pair together with the
//! limits the provider enforces for it. Descriptors never change at runtime;
//! everything that moves lives in the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse capability class of a model, used to bias routing by task complexity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    /// Large reasoning models, preferred for complex work
    Pro,
    /// Low-latency models, preferred for short interactive work
    Fast,
    /// Anything else
    Standard,
}

impl ModelClass {
    /// Guess the class from a provider model id
    pub fn infer(model_id: &str) -> Self {
        let id = model_id.to_lowercase();
        if id.contains("pro") || id.contains("opus") {
            Self::Pro
        } else if ["flash", "fast", "lite", "mini", "haiku"]
            .iter()
            .any(|marker| id.contains(marker))
        {
            Self::Fast
        } else {
            Self::Standard
        }
    }
}

impl fmt::Display for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pro => write!(f, "pro"),
            Self::Fast => write!(f, "fast"),
            Self::Standard => write!(f, "standard"),
        }
    }
}

/// Identity of a candidate in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateKey {
    pub account_id: String,
    pub model_id: String,
}

impl CandidateKey {
    pub fn new(account_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            model_id: model_id.into(),
        }
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.model_id, self.account_id)
    }
}

fn default_priority_tier() -> u8 {
    1
}

fn default_rpm_limit() -> u32 {
    60
}

fn default_rpd_limit() -> u32 {
    1500
}

fn default_max_output_size() -> u32 {
    8192
}

/// Immutable configuration of one routable candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Billing account the calls are charged to
    pub account_id: String,

    /// Provider model identifier
    pub model_id: String,

    /// Lower tiers are tried first
    #[serde(default = "default_priority_tier")]
    pub priority_tier: u8,

    /// Capability class; inferred from the model id when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ModelClass>,

    /// Requests allowed per minute
    #[serde(default = "default_rpm_limit")]
    pub rpm_limit: u32,

    /// Requests allowed per day
    #[serde(default = "default_rpd_limit")]
    pub rpd_limit: u32,

    /// Largest output the model may produce
    #[serde(default = "default_max_output_size")]
    pub max_output_size: u32,
}

impl ModelDescriptor {
    /// Create a descriptor with default limits
    pub fn new(account_id: impl Into<String>, model_id: impl Into<String>, priority_tier: u8) -> Self {
        Self {
            account_id: account_id.into(),
            model_id: model_id.into(),
            priority_tier,
            class: None,
            rpm_limit: default_rpm_limit(),
            rpd_limit: default_rpd_limit(),
            max_output_size: default_max_output_size(),
        }
    }

    /// Set the request limits
    pub fn with_limits(mut self, rpm_limit: u32, rpd_limit: u32) -> Self {
        self.rpm_limit = rpm_limit;
        self.rpd_limit = rpd_limit;
        self
    }

    /// Pin the capability class instead of inferring it
    pub fn with_class(mut self, class: ModelClass) -> Self {
        self.class = Some(class);
        self
    }

    /// Set the output size cap
    pub fn with_max_output(mut self, max_output_size: u32) -> Self {
        self.max_output_size = max_output_size;
        self
    }

    /// Effective capability class
    pub fn model_class(&self) -> ModelClass {
        self.class.unwrap_or_else(|| ModelClass::infer(&self.model_id))
    }

    /// Ledger key for this candidate
    pub fn key(&self) -> CandidateKey {
        CandidateKey::new(&self.account_id, &self.model_id)
    }
}
