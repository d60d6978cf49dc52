//! Three-state circuit breaker.
//!
//! While open, the wrapped operation is not invoked at all. The move from
//! open to half-open happens lazily on the first call after the cool-down,
//! not on a background timer.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// failures while closed before the breaker opens
    pub threshold: u32,
    /// how long to stay open before letting a trial call through
    pub timeout: Duration,
    /// failed trials tolerated in half-open before reopening
    pub half_open_retries: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: Duration::from_secs(60),
            half_open_retries: 1,
        }
    }
}

/// read-only view of a breaker, for logging and health output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}

#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("Circuit breaker is open, call not attempted")]
    Open,

    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open)
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    half_open_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Releases the half-open trial slot if the trial future is dropped before
/// reporting an outcome.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
        }
    }

    /// run `operation` through the breaker
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let is_trial = self.try_acquire().ok_or(BreakerError::Open)?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: is_trial,
        };

        let result = operation().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.record_success(is_trial);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(is_trial);
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Some(is_trial) when the call may proceed, None when it must be rejected
    fn try_acquire(&self) -> Option<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() > self.config.timeout);
                if !cooled_down {
                    return None;
                }
                tracing::debug!(breaker = %self.name, "Circuit breaker transitioning to half-open");
                inner.state = CircuitState::HalfOpen;
                inner.half_open_failures = 0;
                inner.trial_in_flight = true;
                Some(true)
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(true)
                }
            }
        }
    }

    fn record_success(&self, is_trial: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            // a straggler admitted before the breaker opened; the cool-down still applies
            CircuitState::Open => {}
            // only the trial's outcome decides half-open
            CircuitState::HalfOpen if !is_trial => {
                tracing::debug!(breaker = %self.name, "Ignoring straggler success while a trial is in flight");
            }
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "Circuit breaker closed (recovered)");
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.half_open_failures = 0;
                inner.trial_in_flight = false;
            }
        }
    }

    fn record_failure(&self, is_trial: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::HalfOpen if !is_trial => {
                tracing::debug!(breaker = %self.name, "Ignoring straggler failure while a trial is in flight");
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "Circuit breaker opening"
                    );
                    inner.state = CircuitState::Open;
                    inner.last_failure = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                inner.half_open_failures += 1;
                inner.trial_in_flight = false;
                if inner.half_open_failures >= self.config.half_open_retries {
                    tracing::warn!(breaker = %self.name, "Circuit breaker reopening after failed trial");
                    inner.state = CircuitState::Open;
                    inner.last_failure = Some(now);
                    inner.half_open_failures = 0;
                }
            }
            // a call admitted while closed finished after the breaker opened
            CircuitState::Open => inner.last_failure = Some(now),
        }
    }
}
