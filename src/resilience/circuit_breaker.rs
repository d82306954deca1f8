//! Per-key circuit breaker, following spec.md §4.3.
//!
//! Grounded on the teacher's `circuit_breaker::state::CircuitBreaker`
//! (`RwLock<State>` plus atomic failure/success counters, `opened_at`
//! timestamp), generalized from one breaker instance per provider to one
//! breaker instance holding many keyed states, since this crate needs
//! independent breakers for `"llm-dom-discovery"`, vision discovery, and
//! any future remote dependency, without constructing a new top-level type
//! per key.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// State of one key's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is OPEN")]
    CircuitOpen,
    #[error(transparent)]
    OperationError(E),
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

struct KeyState {
    state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
}

impl KeyState {
    fn new() -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            opened_at: RwLock::new(None),
        }
    }
}

/// Keyed circuit breaker: one logical breaker per string key, all sharing
/// the same `CircuitBreakerConfig`.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    states: DashMap<String, Arc<KeyState>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    fn key_state(&self, key: &str) -> Arc<KeyState> {
        self.states.entry(key.to_string()).or_insert_with(|| Arc::new(KeyState::new())).clone()
    }

    pub async fn state(&self, key: &str) -> CircuitState {
        let key_state = self.key_state(key);
        self.resolve_state(&key_state).await
    }

    async fn resolve_state(&self, key_state: &KeyState) -> CircuitState {
        let current = *key_state.state.read().await;
        if current != CircuitState::Open {
            return current;
        }
        let opened_at = *key_state.opened_at.read().await;
        if let Some(opened_at) = opened_at {
            if opened_at.elapsed() >= self.config.timeout {
                *key_state.state.write().await = CircuitState::HalfOpen;
                key_state.consecutive_successes.store(0, Ordering::SeqCst);
                return CircuitState::HalfOpen;
            }
        }
        CircuitState::Open
    }

    /// Run `op` through the breaker for `key`. Rejects immediately without
    /// calling `op` while OPEN and the timeout has not elapsed.
    pub async fn execute<T, E, F, Fut>(&self, key: &str, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let key_state = self.key_state(key);
        let state = self.resolve_state(&key_state).await;
        if state == CircuitState::Open {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match op().await {
            Ok(value) => {
                self.record_success(&key_state, state).await;
                Ok(value)
            }
            Err(error) => {
                self.record_failure(&key_state, state).await;
                Err(CircuitBreakerError::OperationError(error))
            }
        }
    }

    async fn record_success(&self, key_state: &KeyState, observed: CircuitState) {
        key_state.consecutive_failures.store(0, Ordering::SeqCst);
        match observed {
            CircuitState::HalfOpen => {
                let successes = key_state.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    *key_state.state.write().await = CircuitState::Closed;
                    *key_state.opened_at.write().await = None;
                    key_state.consecutive_successes.store(0, Ordering::SeqCst);
                }
            }
            CircuitState::Closed => {
                key_state.consecutive_successes.store(0, Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self, key_state: &KeyState, observed: CircuitState) {
        key_state.consecutive_successes.store(0, Ordering::SeqCst);
        match observed {
            CircuitState::HalfOpen => {
                *key_state.state.write().await = CircuitState::Open;
                *key_state.opened_at.write().await = Some(Instant::now());
                key_state.consecutive_failures.store(0, Ordering::SeqCst);
            }
            CircuitState::Closed => {
                let failures = key_state.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    *key_state.state.write().await = CircuitState::Open;
                    *key_state.opened_at.write().await = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Reset a single key to CLOSED.
    pub async fn reset(&self, key: &str) {
        if let Some(key_state) = self.states.get(key) {
            *key_state.state.write().await = CircuitState::Closed;
            *key_state.opened_at.write().await = None;
            key_state.consecutive_failures.store(0, Ordering::SeqCst);
            key_state.consecutive_successes.store(0, Ordering::SeqCst);
        }
    }

    /// Clear all keyed state, returning every key to CLOSED.
    pub async fn reset_all(&self) {
        self.states.clear();
    }
}
