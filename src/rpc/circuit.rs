// =============================================================================
// Per-endpoint circuit breaker — §3 CircuitState, §4.1 Circuit breaker
// =============================================================================
//
// One `CircuitBreaker` guards a single RPC endpoint. State transitions only
// go closed -> open -> half-open -> {closed, open}, exactly as specified:
// a run of `N_cb` consecutive failures opens the circuit; after the pause it
// becomes half-open and admits exactly one probing call; that call's result
// decides the next state.
//
// Modelled the same way the risk engine's per-day counters are: an internal
// struct behind a `parking_lot::RwLock`, with a narrow public surface.
// =============================================================================

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::CircuitState;

struct Inner {
    consecutive_failures: u32,
    opened_at: f64,
    state: CircuitState,
}

/// Serializable snapshot of a single endpoint's breaker, for health/report
/// surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub endpoint: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

pub struct CircuitBreaker {
    endpoint: String,
    state: RwLock<Inner>,
    failure_threshold: u32,
    pause_sec: f64,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, failure_threshold: u32, pause_sec: f64) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: RwLock::new(Inner {
                consecutive_failures: 0,
                opened_at: 0.0,
                state: CircuitState::Closed,
            }),
            failure_threshold,
            pause_sec,
        }
    }

    fn now() -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0
    }

    /// Whether a call is currently permitted. As a side effect, transitions
    /// `open` -> `half-open` once the pause has elapsed.
    pub fn allow_call(&self) -> bool {
        {
            let s = self.state.read();
            match s.state {
                CircuitState::Closed | CircuitState::HalfOpen => return true,
                CircuitState::Open => {
                    if (Self::now() - s.opened_at) < self.pause_sec {
                        return false;
                    }
                }
            }
        }
        let mut s = self.state.write();
        if s.state == CircuitState::Open && (Self::now() - s.opened_at) >= self.pause_sec {
            s.state = CircuitState::HalfOpen;
        }
        !matches!(s.state, CircuitState::Open)
    }

    pub fn record_success(&self) {
        let mut s = self.state.write();
        s.consecutive_failures = 0;
        s.state = CircuitState::Closed;
    }

    /// Record a failed call. Returns `true` iff this call just tripped the
    /// breaker open (so the caller can rotate to the next endpoint).
    pub fn record_failure(&self) -> bool {
        let mut s = self.state.write();
        match s.state {
            CircuitState::HalfOpen => {
                s.state = CircuitState::Open;
                s.opened_at = Self::now();
                s.consecutive_failures += 1;
                true
            }
            _ => {
                s.consecutive_failures += 1;
                if s.consecutive_failures >= self.failure_threshold && s.state != CircuitState::Open {
                    s.state = CircuitState::Open;
                    s.opened_at = Self::now();
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let s = self.state.read();
        CircuitSnapshot {
            endpoint: self.endpoint.clone(),
            state: s.state,
            consecutive_failures: s.consecutive_failures,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.read().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new("ep", 3, 5.0);
        assert!(cb.allow_call());
        assert!(!cb.record_failure());
        assert!(!cb.record_failure());
        assert!(cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_call());
    }

    #[test]
    fn half_open_success_resets_to_closed() {
        let cb = CircuitBreaker::new("ep", 1, 0.0);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // pause_sec is 0.0, so the very next `allow_call` flips to half-open.
        assert!(cb.allow_call());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_timer() {
        let cb = CircuitBreaker::new("ep", 1, 0.0);
        cb.record_failure();
        cb.allow_call();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
