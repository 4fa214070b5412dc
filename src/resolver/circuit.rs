//! Circuit breaker guarding registry calls during transitive resolution.
//!
//! After `failure_threshold` consecutive registry failures the circuit
//! opens and registry calls are skipped for a cooldown window; affected
//! packages fall back to range-cleaning resolution. Once the cooldown
//! elapses, a single half-open probe is allowed through; success closes
//! the circuit, failure reopens it.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through; failures are counted
    Closed,
    /// Requests are skipped until the cooldown elapses
    Open,
    /// One probe request is in flight to test recovery
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    current: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Per-resolver-instance failure guard. State is behind an async mutex so
/// concurrent workers within a batch update it atomically.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            state: Mutex::new(BreakerState {
                current: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Whether a registry call may be attempted right now. Transitions
    /// Open -> HalfOpen when the cooldown has elapsed.
    pub async fn allow_request(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.current {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = state
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.cooldown);
                if cooled_down {
                    debug!("circuit cooldown elapsed, allowing half-open probe");
                    state.current = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            // A probe is already in flight; hold further calls back
            CircuitState::HalfOpen => false,
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        if state.current != CircuitState::Closed {
            debug!("circuit closing after successful registry call");
        }
        state.current = CircuitState::Closed;
        state.consecutive_failures = 0;
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;
        state.last_failure = Some(Instant::now());

        match state.current {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.failure_threshold {
                    warn!(
                        failures = state.consecutive_failures,
                        cooldown_secs = self.cooldown.as_secs(),
                        "circuit opening, registry calls suspended"
                    );
                    state.current = CircuitState::Open;
                }
            }
            // A failed probe reopens the circuit for another cooldown
            CircuitState::HalfOpen => state.current = CircuitState::Open,
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.current
    }
}
