//! Per-resource circuit breaker.
//!
//! CLOSED counts consecutive failures and trips to OPEN at the threshold.
//! OPEN rejects calls until the cooldown elapses, after which the next check
//! moves to HALF_OPEN and admits exactly one probe. A probe success closes
//! the breaker and resets the failure count; a probe failure reopens it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 3, cooldown_ms: 30_000 }
    }
}

#[derive(Debug)]
struct BreakerCore {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    core: Mutex<BreakerCore>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            core: Mutex::new(BreakerCore {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Gates a call. Returns `false` while OPEN; moves OPEN to HALF_OPEN once
    /// the cooldown has elapsed and admits that single probe call.
    pub fn check(&self, now: DateTime<Utc>) -> bool {
        let mut core = self.lock();
        match core.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled_down = core
                    .opened_at
                    .map(|opened_at| {
                        now - opened_at >= Duration::milliseconds(self.config.cooldown_ms)
                    })
                    .unwrap_or(true);
                if cooled_down {
                    core.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut core = self.lock();
        core.state = BreakerState::Closed;
        core.consecutive_failures = 0;
        core.opened_at = None;
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut core = self.lock();
        match core.state {
            BreakerState::HalfOpen | BreakerState::Open => {
                core.state = BreakerState::Open;
                core.opened_at = Some(now);
            }
            BreakerState::Closed => {
                core.consecutive_failures += 1;
                if core.consecutive_failures >= self.config.failure_threshold {
                    core.state = BreakerState::Open;
                    core.opened_at = Some(now);
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerCore> {
        // A poisoned lock only means a panic elsewhere; breaker state is
        // still coherent.
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Explicit registry of breakers keyed by resource name, shared across every
/// in-flight step and execution that touches the same resource.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self { config, breakers: Mutex::new(HashMap::new()) }
    }

    pub fn breaker(&self, resource: &str) -> Arc<CircuitBreaker> {
        let mut breakers =
            self.breakers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(resource.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config)))
            .clone()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
