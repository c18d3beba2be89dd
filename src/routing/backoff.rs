//! Adaptive inter-attempt delay
//!
//! One delay is shared by every route call. It grows multiplicatively while
//! routes keep needing many fallbacks (or fail outright) and decays while they
//! succeed cleanly, always staying inside the configured bounds.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

fn default_min_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_growth() -> f64 {
    1.1
}

fn default_decay() -> f64 {
    0.9
}

fn default_sustained_failure_fallbacks() -> usize {
    2
}

/// Router tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Lower bound of the inter-attempt delay
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound of the inter-attempt delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied after a struggling route
    #[serde(default = "default_growth")]
    pub growth: f64,

    /// Multiplier applied after a clean route
    #[serde(default = "default_decay")]
    pub decay: f64,

    /// A successful route with more fallbacks than this still counts as struggling
    #[serde(default = "default_sustained_failure_fallbacks")]
    pub sustained_failure_fallbacks: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            growth: default_growth(),
            decay: default_decay(),
            sustained_failure_fallbacks: default_sustained_failure_fallbacks(),
        }
    }
}

impl RouterConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Global delay between consecutive attempts of a route call
#[derive(Debug, Clone)]
pub struct AdaptiveDelay {
    min: Duration,
    max: Duration,
    growth: f64,
    decay: f64,
    sustained_failure_fallbacks: usize,
    current: Duration,
}

impl AdaptiveDelay {
    /// Start at the lower bound
    pub fn new(config: &RouterConfig) -> Self {
        let min = config.min_delay();
        let max = config.max_delay().max(min);
        Self {
            min,
            max,
            growth: config.growth.max(1.0),
            decay: config.decay.clamp(0.0, 1.0),
            sustained_failure_fallbacks: config.sustained_failure_fallbacks,
            current: min,
        }
    }

    /// Delay to wait before the next attempt
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Fold the outcome of a finished route into the delay
    pub fn record_route(&mut self, fallbacks: usize, succeeded: bool) {
        let struggling = !succeeded || fallbacks > self.sustained_failure_fallbacks;
        let factor = if struggling { self.growth } else { self.decay };
        let next = self.current.as_secs_f64() * factor;
        let bounded = next.clamp(self.min.as_secs_f64(), self.max.as_secs_f64());
        self.current = Duration::from_secs_f64(bounded);

        debug!(
            fallbacks,
            succeeded,
            delay_ms = self.current.as_millis() as u64,
            "Adjusted inter-attempt delay"
        );
    }
}
