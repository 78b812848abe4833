// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-module circuit breakers.
//!
//! Closed → Open on a run of consecutive failures; Open → HalfOpen after the
//! cool-down, admitting exactly one probe; the probe's outcome closes or
//! re-opens the circuit.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Dispatchability state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy; calls flow.
    Closed,
    /// Tripped; calls are rejected until the cool-down passes.
    Open,
    /// Cool-down elapsed; exactly one probe call is admitted.
    HalfOpen,
}

/// Circuit tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe.
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// A single module's circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    /// A closed breaker with the given config.
    #[must_use]
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CircuitInner {
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current state, accounting for cool-down expiry.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock().expect("circuit lock poisoned");
        match inner.opened_at {
            None => CircuitState::Closed,
            Some(opened) if opened.elapsed() >= self.config.cooldown => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    /// Whether a call may be dispatched right now.
    ///
    /// In half-open state this admits exactly one probe; further calls are
    /// rejected until the probe reports back.
    #[must_use]
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().expect("circuit lock poisoned");
        match inner.opened_at {
            None => true,
            Some(opened) if opened.elapsed() >= self.config.cooldown => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
            Some(_) => false,
        }
    }

    /// Record a successful call; closes the circuit.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit lock poisoned");
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    /// Record a failed call; trips the circuit at the threshold, and
    /// re-opens it when a half-open probe fails.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit lock poisoned");
        if inner.opened_at.is_some() {
            // Failed probe: restart the cool-down.
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
            return;
        }
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.config.failure_threshold {
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> CircuitConfig {
        CircuitConfig {
            failure_threshold: 2,
            cooldown: Duration::from_millis(20),
        }
    }

    #[test]
    fn starts_closed_and_allows_requests() {
        let breaker = CircuitBreaker::new(quick_config());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn trips_at_the_failure_threshold() {
        let breaker = CircuitBreaker::new(quick_config());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn success_resets_the_failure_run() {
        let breaker = CircuitBreaker::new(quick_config());
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let breaker = CircuitBreaker::new(quick_config());
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request());
        assert!(!breaker.allow_request(), "second probe must be rejected");
    }

    #[test]
    fn successful_probe_closes_the_circuit() {
        let breaker = CircuitBreaker::new(quick_config());
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn failed_probe_reopens_the_circuit() {
        let breaker = CircuitBreaker::new(quick_config());
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }
}
