//! Circuit breaker for calls to failing dependencies.
//!
//! A breaker trips to `Open` after `failure_threshold` consecutive counted
//! failures and rejects calls without invoking them until
//! `recovery_timeout` has passed since the last failure. The first call
//! after that runs as a single half-open trial whose outcome closes or
//! reopens the circuit.
//!
//! The open case is a [`CircuitResult::Open`] value, never an error, so
//! callers have to branch on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::models::CircuitBreakerConfig;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected.
    Open,
    /// One trial call decides between closing and reopening.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a call through a breaker.
#[derive(Debug)]
pub enum CircuitResult<T, E> {
    /// The call ran and succeeded.
    Success(T),
    /// The call was rejected without running.
    Open {
        breaker: String,
        retry_after: Duration,
    },
    /// The call ran and failed.
    Failed(E),
}

impl<T, E> CircuitResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }
}

/// Serializable view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: config.recovery_timeout(),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn stats(&self) -> CircuitStats {
        let state = self.lock();
        CircuitStats {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            failure_threshold: self.failure_threshold,
            last_failure_time: state.last_failure_time,
        }
    }

    /// Run `op` through the breaker, counting every error as a failure.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> CircuitResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(op, |_| true).await
    }

    /// Run `op` through the breaker. Errors for which `counts_as_failure`
    /// returns `false` are handed back but leave the breaker as a success
    /// would.
    pub async fn call_classified<T, E, F, Fut, C>(
        &self,
        op: F,
        counts_as_failure: C,
    ) -> CircuitResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let admission = match self.admit() {
            Ok(admission) => admission,
            Err(retry_after) => {
                return CircuitResult::Open {
                    breaker: self.name.clone(),
                    retry_after,
                }
            }
        };

        let mut trial = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };

        let result = op().await;
        trial.armed = false;

        match result {
            Ok(value) => {
                self.on_success(admission);
                CircuitResult::Success(value)
            }
            Err(e) => {
                if counts_as_failure(&e) {
                    self.on_failure(admission);
                } else {
                    self.on_success(admission);
                }
                CircuitResult::Failed(e)
            }
        }
    }

    /// Decide whether a call may run. `Err` carries the remaining wait.
    fn admit(&self) -> Result<Admission, Duration> {
        let mut s = self.lock();
        match s.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = s.last_failure.map_or(self.recovery_timeout, |t| t.elapsed());
                if elapsed >= self.recovery_timeout {
                    s.state = CircuitState::HalfOpen;
                    s.trial_in_flight = true;
                    info!(breaker = %self.name, "Circuit half-open; running trial call");
                    Ok(Admission::Trial)
                } else {
                    Err(self.recovery_timeout - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if s.trial_in_flight {
                    Err(Duration::ZERO)
                } else {
                    s.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut s = self.lock();
        match (s.state, admission) {
            (CircuitState::Closed, _) => s.failure_count = 0,
            (CircuitState::HalfOpen, Admission::Trial) => {
                s.state = CircuitState::Closed;
                s.failure_count = 0;
                s.trial_in_flight = false;
                info!(breaker = %self.name, "Circuit closed");
            }
            // Late result of a call admitted before the circuit opened.
            _ => {}
        }
    }

    fn on_failure(&self, admission: Admission) {
        let mut s = self.lock();
        match (s.state, admission) {
            (CircuitState::Closed, _) => {
                s.failure_count += 1;
                s.last_failure = Some(Instant::now());
                s.last_failure_time = Some(Utc::now());
                if s.failure_count >= self.failure_threshold {
                    s.state = CircuitState::Open;
                    warn!(
                        breaker = %self.name,
                        failures = s.failure_count,
                        recovery_timeout_ms = self.recovery_timeout.as_millis() as u64,
                        "Circuit opened"
                    );
                }
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                s.state = CircuitState::Open;
                s.trial_in_flight = false;
                s.last_failure = Some(Instant::now());
                s.last_failure_time = Some(Utc::now());
                warn!(breaker = %self.name, "Trial call failed; circuit reopened");
            }
            _ => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frees the half-open trial slot if the trial future is dropped before it
/// completes.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

/// One breaker per named dependency, created on first use.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, &self.config)))
            .clone()
    }

    /// Stats of every breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<CircuitStats> {
        let breakers: Vec<Arc<CircuitBreaker>> = {
            let map = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
            map.values().cloned().collect()
        };
        let mut stats: Vec<_> = breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Names of breakers currently not closed.
    pub fn open_breakers(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|s| s.state != CircuitState::Closed)
            .map(|s| s.name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, recovery_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "grading-api",
            &CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout_ms: recovery_ms,
            },
        )
    }

    async fn fail(b: &CircuitBreaker, calls: &AtomicU32) -> CircuitResult<(), &'static str> {
        b.call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down")
        })
        .await
    }

    async fn succeed(b: &CircuitBreaker, calls: &AtomicU32) -> CircuitResult<u32, &'static str> {
        b.call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await
    }

    #[test]
    fn test_circuit_state_names() {
        assert_eq!(CircuitState::Closed.as_str(), "closed");
        assert_eq!(CircuitState::Open.as_str(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects_without_invoking() {
        let b = breaker(3, 60_000);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(matches!(fail(&b, &calls).await, CircuitResult::Failed("down")));
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let result = succeed(&b, &calls).await;
        assert!(result.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count_while_closed() {
        let b = breaker(3, 60_000);
        let calls = AtomicU32::new(0);

        fail(&b, &calls).await;
        fail(&b, &calls).await;
        assert_eq!(b.failure_count(), 2);

        assert_eq!(succeed(&b, &calls).await.success(), Some(7));
        assert_eq!(b.failure_count(), 0);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_success_closes() {
        let b = breaker(2, 1_000);
        let calls = AtomicU32::new(0);
        fail(&b, &calls).await;
        fail(&b, &calls).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1_001)).await;

        assert!(succeed(&b, &calls).await.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_reopens() {
        let b = breaker(1, 1_000);
        let calls = AtomicU32::new(0);
        fail(&b, &calls).await;

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert!(matches!(fail(&b, &calls).await, CircuitResult::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(b.state(), CircuitState::Open);

        // The reopen restarts the recovery clock.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(succeed(&b, &calls).await.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_result_reports_remaining_wait() {
        let b = breaker(1, 10_000);
        let calls = AtomicU32::new(0);
        fail(&b, &calls).await;

        tokio::time::advance(Duration::from_secs(4)).await;
        match succeed(&b, &calls).await {
            CircuitResult::Open {
                breaker,
                retry_after,
            } => {
                assert_eq!(breaker, "grading-api");
                assert_eq!(retry_after, Duration::from_secs(6));
            }
            other => panic!("expected open, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unclassified_errors_do_not_trip() {
        let b = breaker(1, 60_000);

        let result: CircuitResult<(), &str> = b
            .call_classified(|| async { Err("validation") }, |e| *e != "validation")
            .await;

        assert!(matches!(result, CircuitResult::Failed("validation")));
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_failures_count_atomically() {
        let b = Arc::new(breaker(50, 60_000));
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let b = b.clone();
            tasks.push(tokio::spawn(async move {
                let _: CircuitResult<(), &str> = b.call(|| async { Err("down") }).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(b.failure_count(), 20);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_registry_reuses_breakers_and_reports_open() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_ms: 60_000,
        });

        let a = registry.get_or_create("ai-grader");
        let again = registry.get_or_create("ai-grader");
        assert!(Arc::ptr_eq(&a, &again));
        registry.get_or_create("certificates");

        let _: CircuitResult<(), &str> = a.call(|| async { Err("down") }).await;

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "ai-grader");
        assert_eq!(snapshot[0].state, CircuitState::Open);
        assert!(snapshot[0].last_failure_time.is_some());
        assert_eq!(registry.open_breakers(), vec!["ai-grader".to_string()]);
    }
}
