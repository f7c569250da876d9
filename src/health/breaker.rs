// src/health/breaker.rs — Circuit breaker over a trailing outcome window
//
// Closed counts outcomes in a time-bounded window and trips to Open when
// the windowed error rate crosses the threshold (with a minimum sample
// count, so one early failure can't trip an idle pair). Open rejects
// without network I/O until the cooldown elapses, then HalfOpen admits
// exactly one trial: success re-closes and resets the window, failure
// re-opens with a doubled cooldown, capped.

use serde::Serialize;
use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

use crate::infra::config::HealthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub window: Duration,
    pub min_samples: u32,
    pub error_rate_threshold: f64,
    pub open_cooldown: Duration,
    pub max_open_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

impl From<&HealthConfig> for BreakerConfig {
    fn from(c: &HealthConfig) -> Self {
        Self {
            window: Duration::from_secs(c.window_seconds),
            min_samples: c.min_samples,
            error_rate_threshold: c.error_rate_threshold,
            open_cooldown: Duration::from_secs(c.open_cooldown_seconds),
            max_open_cooldown: Duration::from_secs(c.max_open_cooldown_seconds),
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    /// (when, success) outcomes, oldest first; pruned to the window.
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    /// Consecutive trips without an intervening successful trial; scales
    /// the cooldown.
    consecutive_trips: u32,
    /// A HalfOpen trial is in flight; no second request may claim it.
    trial_inflight: bool,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: None,
            consecutive_trips: 0,
            trial_inflight: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(t, _)) = self.window.front() {
            if now.duration_since(t) > self.config.window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn cooldown(&self) -> Duration {
        let exp = self.consecutive_trips.saturating_sub(1).min(10);
        self.config
            .open_cooldown
            .saturating_mul(1u32 << exp)
            .min(self.config.max_open_cooldown)
    }

    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.consecutive_trips = self.consecutive_trips.saturating_add(1);
    }

    /// Whether a request may proceed now. An Open circuit past its cooldown
    /// flips to HalfOpen and admits the caller as the single trial; a
    /// HalfOpen circuit with a trial in flight refuses.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|t| now.duration_since(t))
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.cooldown() {
                    self.state = CircuitState::HalfOpen;
                    self.trial_inflight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_inflight {
                    false
                } else {
                    self.trial_inflight = true;
                    true
                }
            }
        }
    }

    /// Chain-building view of `try_acquire`: same answer, but claims no
    /// trial slot and performs no transition.
    pub fn is_routable(&self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self
                .opened_at
                .map(|t| now.duration_since(t) >= self.cooldown())
                .unwrap_or(true),
            CircuitState::HalfOpen => !self.trial_inflight,
        }
    }

    /// Release a claimed trial slot without an outcome, for attempts that
    /// never reached the network (deadline hit first, adapter missing).
    pub fn release_trial(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.trial_inflight = false;
        }
    }

    pub fn record(&mut self, now: Instant, success: bool) {
        match self.state {
            CircuitState::HalfOpen => {
                self.trial_inflight = false;
                if success {
                    self.state = CircuitState::Closed;
                    self.opened_at = None;
                    self.consecutive_trips = 0;
                    self.window.clear();
                    self.window.push_back((now, true));
                } else {
                    self.window.push_back((now, false));
                    self.trip(now);
                }
            }
            CircuitState::Closed => {
                self.window.push_back((now, success));
                self.prune(now);
                let total = self.window.len() as u32;
                if total >= self.config.min_samples {
                    let errors = self.window.iter().filter(|(_, ok)| !ok).count();
                    let rate = errors as f64 / total as f64;
                    if rate > self.config.error_rate_threshold {
                        self.trip(now);
                    }
                }
            }
            CircuitState::Open => {
                // Outcome of a request already in flight when the circuit
                // tripped; recorded, no transition.
                self.window.push_back((now, success));
                self.prune(now);
            }
        }
    }

    /// Windowed success rate; None with no samples.
    pub fn success_rate(&mut self, now: Instant) -> Option<f64> {
        self.prune(now);
        if self.window.is_empty() {
            return None;
        }
        let ok = self.window.iter().filter(|(_, s)| *s).count();
        Some(ok as f64 / self.window.len() as f64)
    }
}
