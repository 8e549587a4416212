//! Circuit breaker for the primary cache backend.
//!
//! When Redis is down every call would otherwise pay a connection timeout
//! before falling through. After enough consecutive failures the breaker
//! opens and the store goes straight to the fallback until the cooldown
//! elapses, then lets a few probe calls through.

use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failures exceeded, primary skipped
    HalfOpen, // Probing whether the primary recovered
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// Failure-counting breaker. Time is passed in by the caller (unix millis)
/// so the store's injected clock drives it.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_state_change_ms: i64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, now_ms: i64) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_calls: 0,
            last_state_change_ms: now_ms,
        }
    }

    /// Check if the primary may be called
    pub fn can_call(&mut self, now_ms: i64) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = now_ms.saturating_sub(self.last_state_change_ms);
                if elapsed >= self.config.cooldown.as_millis() as i64 {
                    self.transition_to(CircuitState::HalfOpen, now_ms);
                    self.half_open_calls = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_calls < self.config.half_open_max_calls {
                    self.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful primary call
    pub fn record_success(&mut self, now_ms: i64) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.transition_to(CircuitState::Closed, now_ms);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed primary call
    pub fn record_failure(&mut self, now_ms: i64) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open, now_ms);
                }
            }
            // Single failure while probing re-opens
            CircuitState::HalfOpen => self.transition_to(CircuitState::Open, now_ms),
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    fn transition_to(&mut self, state: CircuitState, now_ms: i64) {
        info!("Primary cache breaker: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.last_state_change_ms = now_ms;

        match state {
            CircuitState::Closed => {
                self.failure_count = 0;
                self.success_count = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_calls = 0;
                self.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }
}
