//! Per-class circuit breaker guarding scan execution.
//!
//! Keys are `(artifact_kind, tenant)` pairs; each key gets its own breaker.
//! Half-open admits exactly one concurrent probe per key.

use crate::constants::{
    CIRCUIT_FAILURE_THRESHOLD, CIRCUIT_OPEN_TIMEOUT_SECS, CIRCUIT_SUCCESS_THRESHOLD,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing; reject all requests until the timeout elapses.
    Open,
    /// Testing recovery with a single probe.
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long an open circuit waits before admitting a probe.
    pub timeout_duration: Duration,
    /// Successful probes needed to close from half-open.
    pub success_threshold: u32,
    /// Window within which failures accumulate; older failures reset the count.
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: CIRCUIT_FAILURE_THRESHOLD,
            timeout_duration: Duration::from_secs(CIRCUIT_OPEN_TIMEOUT_SECS),
            success_threshold: CIRCUIT_SUCCESS_THRESHOLD,
            failure_window: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure_time: RwLock<Option<Instant>>,
    last_state_change: RwLock<Instant>,
    /// Guards the single half-open probe slot.
    probe_in_flight: AtomicBool,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_time: RwLock::new(None),
            last_state_change: RwLock::new(Instant::now()),
            probe_in_flight: AtomicBool::new(false),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether a request may proceed right now.
    pub async fn should_allow_request(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let current_state = *self.state.read().await;
        match current_state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let last_change = *self.last_state_change.read().await;
                if last_change.elapsed() >= self.config.timeout_duration {
                    self.transition_to_half_open().await;
                    // The transitioning caller takes the probe slot.
                    self.probe_in_flight
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self
                .probe_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        }
    }

    /// Records a successful request.
    pub async fn record_success(&self) {
        let current_state = *self.state.read().await;
        match current_state {
            CircuitState::HalfOpen => {
                self.probe_in_flight.store(false, Ordering::Release);
                let count = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "Circuit {} probe success {}/{}",
                    self.key, count, self.config.success_threshold
                );
                if count >= self.config.success_threshold {
                    self.transition_to_closed().await;
                }
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {
                warn!("Circuit {}: success recorded while open", self.key);
            }
        }
    }

    /// Records a failed request.
    pub async fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let current_state = *self.state.read().await;
        match current_state {
            CircuitState::Closed => {
                let mut last_failure = self.last_failure_time.write().await;
                let now = Instant::now();

                let count = match *last_failure {
                    Some(last) if now.duration_since(last) > self.config.failure_window => {
                        self.failure_count.store(1, Ordering::Relaxed);
                        1
                    }
                    Some(_) => self.failure_count.fetch_add(1, Ordering::Relaxed) + 1,
                    None => {
                        self.failure_count.store(1, Ordering::Relaxed);
                        1
                    }
                };
                *last_failure = Some(now);

                debug!(
                    "Circuit {} failure count {}/{}",
                    self.key, count, self.config.failure_threshold
                );
                if count >= self.config.failure_threshold {
                    drop(last_failure);
                    self.transition_to_open().await;
                }
            }
            CircuitState::HalfOpen => {
                // A failed probe reopens the circuit immediately.
                self.probe_in_flight.store(false, Ordering::Release);
                self.transition_to_open().await;
            }
            CircuitState::Open => {
                let mut last_failure = self.last_failure_time.write().await;
                *last_failure = Some(Instant::now());
            }
        }
    }

    async fn transition_to_open(&self) {
        let mut state = self.state.write().await;
        let previous = *state;
        *state = CircuitState::Open;

        let mut last_change = self.last_state_change.write().await;
        *last_change = Instant::now();

        self.success_count.store(0, Ordering::Relaxed);
        self.probe_in_flight.store(false, Ordering::Release);

        warn!(
            "Circuit breaker opened for {} (was {:?}); {} requests, {} failures",
            self.key,
            previous,
            self.total_requests.load(Ordering::Relaxed),
            self.total_failures.load(Ordering::Relaxed)
        );
    }

    async fn transition_to_half_open(&self) {
        let mut state = self.state.write().await;
        if *state != CircuitState::Open {
            return;
        }
        *state = CircuitState::HalfOpen;

        let mut last_change = self.last_state_change.write().await;
        *last_change = Instant::now();

        self.success_count.store(0, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);

        info!("Circuit breaker for {} is half-open", self.key);
    }

    async fn transition_to_closed(&self) {
        let mut state = self.state.write().await;
        *state = CircuitState::Closed;

        let mut last_change = self.last_state_change.write().await;
        *last_change = Instant::now();

        self.failure_count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.probe_in_flight.store(false, Ordering::Release);

        info!("Circuit breaker for {} closed; service recovered", self.key);
    }

    pub async fn get_state(&self) -> CircuitState {
        *self.state.read().await
    }

    pub async fn get_metrics(&self) -> CircuitBreakerMetrics {
        let last_change = *self.last_state_change.read().await;
        CircuitBreakerMetrics {
            key: self.key.clone(),
            state: *self.state.read().await,
            failure_count: self.failure_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            last_state_change_seconds: last_change.elapsed().as_secs(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CircuitBreakerMetrics {
    pub key: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub last_state_change_seconds: u64,
}
