//! Per-candidate usage counters and health state
//!
//! The ledger owns one [`QuotaCounter`] per (account, model) pair. Counters are
//! created lazily on first touch and windows roll over lazily on the next
//! access, so nothing here needs a background task.

use super::descriptor::{CandidateKey, ModelDescriptor};
use crate::clock::{elapsed_between, to_chrono, SharedClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Length of the short quota window
pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// Length of the long quota window
pub const DAY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Selectability of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaStatus {
    /// Comfortably inside both windows
    Available,
    /// Close to a limit; still selectable with a penalty
    Limited,
    /// Daily quota effectively used up
    Exhausted,
    /// Unhealthy, failing repeatedly, or cooling down
    Error,
}

impl QuotaStatus {
    /// Whether the router may pick a candidate in this state
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Available | Self::Limited)
    }

    /// Ordering penalty among candidates of the same tier
    pub fn penalty(&self) -> u8 {
        match self {
            Self::Available => 0,
            Self::Limited => 1,
            Self::Exhausted => 2,
            Self::Error => 3,
        }
    }
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_unhealthy_after() -> u32 {
    3
}

fn default_health_recovery_secs() -> u64 {
    1800
}

fn default_latency_smoothing() -> f64 {
    0.2
}

/// Tunables for the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    /// How long a candidate is blocked after a quota error
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Consecutive failures before a candidate is marked unhealthy
    #[serde(default = "default_unhealthy_after")]
    pub unhealthy_after: u32,

    /// Quiet period after which an unhealthy candidate is given another chance
    #[serde(default = "default_health_recovery_secs")]
    pub health_recovery_secs: u64,

    /// Weight of the newest sample in the latency moving average
    #[serde(default = "default_latency_smoothing")]
    pub latency_smoothing: f64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            unhealthy_after: default_unhealthy_after(),
            health_recovery_secs: default_health_recovery_secs(),
            latency_smoothing: default_latency_smoothing(),
        }
    }
}

impl QuotaPolicy {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn health_recovery(&self) -> Duration {
        Duration::from_secs(self.health_recovery_secs)
    }
}

/// Rolling counters and health for one candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaCounter {
    pub minute_window_start: DateTime<Utc>,
    pub minute_count: u32,
    pub day_window_start: DateTime<Utc>,
    pub day_count: u32,
    pub consecutive_errors: u32,
    pub healthy: bool,
    pub cooldown_until: Option<DateTime<Utc>>,

    pub total_requests: u64,
    pub successes: u64,
    pub quota_errors: u64,
    pub other_errors: u64,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
    pub average_latency: Option<Duration>,
}

impl QuotaCounter {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            minute_window_start: now,
            minute_count: 0,
            day_window_start: now,
            day_count: 0,
            consecutive_errors: 0,
            healthy: true,
            cooldown_until: None,
            total_requests: 0,
            successes: 0,
            quota_errors: 0,
            other_errors: 0,
            last_attempt: None,
            last_success: None,
            last_error: None,
            average_latency: None,
        }
    }

    /// Reset any window whose length has fully elapsed
    fn roll_windows(&mut self, now: DateTime<Utc>) {
        if elapsed_between(self.minute_window_start, now) >= MINUTE_WINDOW {
            self.minute_count = 0;
            self.minute_window_start = now;
        }
        if elapsed_between(self.day_window_start, now) >= DAY_WINDOW {
            self.day_count = 0;
            self.day_window_start = now;
        }
    }

    /// Minute count as it would read after a lazy reset
    fn effective_minute_count(&self, now: DateTime<Utc>) -> u32 {
        if elapsed_between(self.minute_window_start, now) >= MINUTE_WINDOW {
            0
        } else {
            self.minute_count
        }
    }

    /// Day count as it would read after a lazy reset
    fn effective_day_count(&self, now: DateTime<Utc>) -> u32 {
        if elapsed_between(self.day_window_start, now) >= DAY_WINDOW {
            0
        } else {
            self.day_count
        }
    }

    fn cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

/// Point-in-time view of one candidate, for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct QuotaSnapshot {
    pub account_id: String,
    pub model_id: String,
    pub priority_tier: u8,
    pub status: QuotaStatus,
    pub minute_count: u32,
    pub rpm_limit: u32,
    pub day_count: u32,
    pub rpd_limit: u32,
    pub consecutive_errors: u32,
    pub healthy: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub successes: u64,
    pub quota_errors: u64,
    pub other_errors: u64,
    pub average_latency_ms: Option<u64>,
}

/// `count` has reached `percent`% of `limit`
fn reached(count: u32, limit: u32, percent: u64) -> bool {
    u64::from(count) * 100 >= u64::from(limit) * percent
}

/// Rolling usage counters keyed by candidate
pub struct QuotaLedger {
    policy: QuotaPolicy,
    clock: SharedClock,
    counters: HashMap<CandidateKey, QuotaCounter>,
}

impl QuotaLedger {
    /// Create an empty ledger
    pub fn new(policy: QuotaPolicy, clock: SharedClock) -> Self {
        Self {
            policy,
            clock,
            counters: HashMap::new(),
        }
    }

    /// Policy in effect
    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    fn counter_mut(&mut self, key: &CandidateKey, now: DateTime<Utc>) -> &mut QuotaCounter {
        let counter = self
            .counters
            .entry(key.clone())
            .or_insert_with(|| QuotaCounter::new(now));
        counter.roll_windows(now);
        counter
    }

    /// Current counter for a candidate, if it has ever been touched
    pub fn counter(&self, key: &CandidateKey) -> Option<&QuotaCounter> {
        self.counters.get(key)
    }

    /// Count one outgoing request against both windows
    pub fn record_attempt(&mut self, key: &CandidateKey) {
        let now = self.clock.now();
        let counter = self.counter_mut(key, now);
        counter.minute_count = counter.minute_count.saturating_add(1);
        counter.day_count = counter.day_count.saturating_add(1);
        counter.total_requests += 1;
        counter.last_attempt = Some(now);

        debug!(
            candidate = %key,
            minute = counter.minute_count,
            day = counter.day_count,
            "Recorded attempt"
        );
    }

    /// Block a candidate for the cooldown period after a provider quota rejection
    pub fn record_quota_error(&mut self, key: &CandidateKey) {
        let now = self.clock.now();
        let cooldown = self.policy.cooldown();
        let counter = self.counter_mut(key, now);
        let until = now + to_chrono(cooldown);
        counter.cooldown_until = Some(until);
        counter.quota_errors += 1;
        counter.last_error = Some(now);

        warn!(candidate = %key, cooldown_until = %until, "Quota error, candidate cooling down");
    }

    /// Mark a successful call and fold its latency into the moving average
    pub fn record_success(&mut self, key: &CandidateKey, latency: Duration) {
        let now = self.clock.now();
        let alpha = self.policy.latency_smoothing.clamp(0.0, 1.0);
        let counter = self.counter_mut(key, now);
        counter.consecutive_errors = 0;
        counter.healthy = true;
        counter.successes += 1;
        counter.last_success = Some(now);
        counter.average_latency = Some(match counter.average_latency {
            None => latency,
            Some(previous) => Duration::from_secs_f64(
                alpha * latency.as_secs_f64() + (1.0 - alpha) * previous.as_secs_f64(),
            ),
        });
    }

    /// Count a non-quota failure; enough of them in a row marks the candidate unhealthy
    pub fn record_failure(&mut self, key: &CandidateKey) {
        let now = self.clock.now();
        let threshold = self.policy.unhealthy_after;
        let counter = self.counter_mut(key, now);
        counter.consecutive_errors += 1;
        counter.other_errors += 1;
        counter.last_error = Some(now);

        if counter.consecutive_errors >= threshold && counter.healthy {
            counter.healthy = false;
            warn!(
                candidate = %key,
                consecutive_errors = counter.consecutive_errors,
                "Candidate marked unhealthy"
            );
        }
    }

    /// Classify a candidate against its limits and health
    pub fn status(&self, descriptor: &ModelDescriptor) -> QuotaStatus {
        let Some(counter) = self.counters.get(&descriptor.key()) else {
            return QuotaStatus::Available;
        };
        let now = self.clock.now();

        if !counter.healthy
            || counter.consecutive_errors >= self.policy.unhealthy_after
            || counter.cooling_down(now)
        {
            return QuotaStatus::Error;
        }

        let day = counter.effective_day_count(now);
        let minute = counter.effective_minute_count(now);

        if reached(day, descriptor.rpd_limit, 95) {
            QuotaStatus::Exhausted
        } else if reached(day, descriptor.rpd_limit, 80) || reached(minute, descriptor.rpm_limit, 90) {
            QuotaStatus::Limited
        } else {
            QuotaStatus::Available
        }
    }

    /// Give unhealthy candidates another chance once they have been left alone long enough
    pub fn recover_stale_health(&mut self) -> usize {
        let now = self.clock.now();
        let quiet_for = self.policy.health_recovery();
        let mut restored = 0;

        for (key, counter) in self.counters.iter_mut() {
            if counter.healthy && counter.consecutive_errors < self.policy.unhealthy_after {
                continue;
            }
            let idle = counter
                .last_attempt
                .map(|at| elapsed_between(at, now))
                .unwrap_or(Duration::MAX);
            if idle > quiet_for {
                counter.consecutive_errors = 0;
                counter.healthy = true;
                restored += 1;
                info!(candidate = %key, "Restored candidate health");
            }
        }

        restored
    }

    /// Status of every given candidate with its counters
    pub fn snapshot(&self, candidates: &[ModelDescriptor]) -> Vec<QuotaSnapshot> {
        let now = self.clock.now();
        candidates
            .iter()
            .map(|descriptor| {
                let counter = self.counters.get(&descriptor.key());
                QuotaSnapshot {
                    account_id: descriptor.account_id.clone(),
                    model_id: descriptor.model_id.clone(),
                    priority_tier: descriptor.priority_tier,
                    status: self.status(descriptor),
                    minute_count: counter.map_or(0, |c| c.effective_minute_count(now)),
                    rpm_limit: descriptor.rpm_limit,
                    day_count: counter.map_or(0, |c| c.effective_day_count(now)),
                    rpd_limit: descriptor.rpd_limit,
                    consecutive_errors: counter.map_or(0, |c| c.consecutive_errors),
                    healthy: counter.map_or(true, |c| c.healthy),
                    cooldown_until: counter.and_then(|c| c.cooldown_until),
                    total_requests: counter.map_or(0, |c| c.total_requests),
                    successes: counter.map_or(0, |c| c.successes),
                    quota_errors: counter.map_or(0, |c| c.quota_errors),
                    other_errors: counter.map_or(0, |c| c.other_errors),
                    average_latency_ms: counter
                        .and_then(|c| c.average_latency)
                        .map(|d| d.as_millis() as u64),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn ledger() -> (QuotaLedger, ManualClock) {
        let clock = ManualClock::new();
        let ledger = QuotaLedger::new(QuotaPolicy::default(), Arc::new(clock.clone()));
        (ledger, clock)
    }

    fn descriptor(rpm: u32, rpd: u32) -> ModelDescriptor {
        ModelDescriptor::new("primary", "gemini-2.5-flash", 1).with_limits(rpm, rpd)
    }

    #[test]
    fn test_untouched_candidate_is_available() {
        let (ledger, _) = ledger();
        assert_eq!(ledger.status(&descriptor(10, 100)), QuotaStatus::Available);
        assert!(ledger.counter(&descriptor(10, 100).key()).is_none());
    }

    #[test]
    fn test_counts_match_attempts() {
        let (mut ledger, _) = ledger();
        let d = descriptor(100, 1000);

        for _ in 0..7 {
            ledger.record_attempt(&d.key());
        }

        let counter = ledger.counter(&d.key()).unwrap();
        assert_eq!(counter.minute_count, 7);
        assert_eq!(counter.day_count, 7);
        assert_eq!(counter.total_requests, 7);
    }

    #[test]
    fn test_minute_window_resets_lazily() {
        let (mut ledger, clock) = ledger();
        let d = descriptor(10, 1000);

        for _ in 0..9 {
            ledger.record_attempt(&d.key());
        }
        assert_eq!(ledger.status(&d), QuotaStatus::Limited);

        clock.advance(MINUTE_WINDOW);
        assert_eq!(ledger.status(&d), QuotaStatus::Available);

        ledger.record_attempt(&d.key());
        let counter = ledger.counter(&d.key()).unwrap();
        assert_eq!(counter.minute_count, 1);
        assert_eq!(counter.day_count, 10);
    }

    #[test]
    fn test_status_tightens_as_counts_rise() {
        let (mut ledger, _) = ledger();
        let d = descriptor(1000, 100);
        let mut seen = Vec::new();

        for _ in 0..100 {
            ledger.record_attempt(&d.key());
            seen.push(ledger.status(&d));
        }

        // Never loosens inside a window
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(seen[78], QuotaStatus::Available); // 79 of 100
        assert_eq!(seen[79], QuotaStatus::Limited); // 80 of 100
        assert_eq!(seen[93], QuotaStatus::Limited); // 94 of 100
        assert_eq!(seen[94], QuotaStatus::Exhausted); // 95 of 100
    }

    #[test]
    fn test_day_window_resets() {
        let (mut ledger, clock) = ledger();
        let d = descriptor(1000, 20);

        for _ in 0..19 {
            ledger.record_attempt(&d.key());
        }
        assert_eq!(ledger.status(&d), QuotaStatus::Exhausted);

        clock.advance(DAY_WINDOW);
        assert_eq!(ledger.status(&d), QuotaStatus::Available);
    }

    #[test]
    fn test_quota_error_cools_down() {
        let (mut ledger, clock) = ledger();
        let d = descriptor(100, 1000);

        ledger.record_quota_error(&d.key());
        assert_eq!(ledger.status(&d), QuotaStatus::Error);
        assert_eq!(ledger.counter(&d.key()).unwrap().quota_errors, 1);

        clock.advance(Duration::from_secs(299));
        assert_eq!(ledger.status(&d), QuotaStatus::Error);

        clock.advance(Duration::from_secs(1));
        assert_eq!(ledger.status(&d), QuotaStatus::Available);
    }

    #[test]
    fn test_consecutive_failures_mark_unhealthy() {
        let (mut ledger, _) = ledger();
        let d = descriptor(100, 1000);

        ledger.record_failure(&d.key());
        ledger.record_failure(&d.key());
        assert_eq!(ledger.status(&d), QuotaStatus::Available);

        ledger.record_failure(&d.key());
        assert_eq!(ledger.status(&d), QuotaStatus::Error);
        assert!(!ledger.counter(&d.key()).unwrap().healthy);

        ledger.record_success(&d.key(), Duration::from_millis(100));
        assert_eq!(ledger.status(&d), QuotaStatus::Available);
        assert_eq!(ledger.counter(&d.key()).unwrap().consecutive_errors, 0);
    }

    #[test]
    fn test_latency_moving_average() {
        let (mut ledger, _) = ledger();
        let key = descriptor(100, 1000).key();

        ledger.record_success(&key, Duration::from_millis(1000));
        ledger.record_success(&key, Duration::from_millis(2000));

        let average = ledger.counter(&key).unwrap().average_latency.unwrap();
        assert!((1199..=1200).contains(&average.as_millis()));
    }

    #[test]
    fn test_stale_health_recovers() {
        let (mut ledger, clock) = ledger();
        let d = descriptor(100, 1000);

        for _ in 0..3 {
            ledger.record_attempt(&d.key());
            ledger.record_failure(&d.key());
        }
        assert_eq!(ledger.recover_stale_health(), 0);

        clock.advance(Duration::from_secs(1801));
        assert_eq!(ledger.recover_stale_health(), 1);
        assert_eq!(ledger.status(&d), QuotaStatus::Available);
    }

    #[test]
    fn test_snapshot_reports_every_candidate() {
        let (mut ledger, _) = ledger();
        let touched = descriptor(100, 1000);
        let untouched = ModelDescriptor::new("backup", "gemini-2.5-pro", 2);

        ledger.record_attempt(&touched.key());

        let snapshot = ledger.snapshot(&[touched, untouched]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].minute_count, 1);
        assert_eq!(snapshot[1].total_requests, 0);
        assert!(snapshot[1].healthy);
    }
}
