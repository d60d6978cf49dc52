//! Retry with exponential backoff.
//!
//! [`with_retry`] drives an async operation until it succeeds, the retry
//! budget runs out, or the operation fails with an error the predicate says
//! is not worth retrying. Waits between attempts are `tokio::time::sleep`
//! suspensions, so a paused test clock controls them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// errors that can tell whether a fresh attempt might succeed
pub trait Transient {
    /// true for failures where no response arrived or the server answered 5xx
    fn is_transient(&self) -> bool;
}

/// classify an http status the way the default retry predicate does
pub fn is_transient_status(status: Option<u16>) -> bool {
    match status {
        None => true,
        Some(code) => (500..600).contains(&code),
    }
}

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(&E, u32) + Send + Sync>;

pub struct RetryOptions<E> {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    retry_predicate: Predicate<E>,
    on_retry: Option<RetryHook<E>>,
}

impl<E: Transient> Default for RetryOptions<E> {
    fn default() -> Self {
        Self::with_predicate(|err: &E| err.is_transient())
    }
}

impl<E> RetryOptions<E> {
    /// default timings with a caller-supplied "is this retryable" check
    pub fn with_predicate(predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            retry_predicate: Arc::new(predicate),
            on_retry: None,
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// growth factor between waits; values below 1.0 or not finite fall back to 1.0
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        let checked = usable_multiplier(multiplier);
        if checked != multiplier {
            tracing::warn!(multiplier, "Invalid backoff multiplier, using constant delay");
        }
        self.backoff_multiplier = checked;
        self
    }

    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retry_predicate = Arc::new(predicate);
        self
    }

    /// observe each failed attempt that is about to be retried
    pub fn on_retry(mut self, hook: impl Fn(&E, u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            max_retries: self.max_retries,
            num_retries: 0,
            current_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: usable_multiplier(self.backoff_multiplier),
        }
    }
}

fn usable_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() && multiplier >= 1.0 {
        multiplier
    } else {
        1.0
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff_multiplier: self.backoff_multiplier,
            retry_predicate: Arc::clone(&self.retry_predicate),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// yields the wait before each retry, `max_retries` times
struct ExponentialBackoff {
    max_retries: u32,
    num_retries: u32,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_retries >= self.max_retries {
            return None;
        }
        let delay = self.current_delay.min(self.max_delay);
        // saturate at max_delay instead of overflowing the duration
        self.current_delay = Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        self.num_retries += 1;
        Some(delay)
    }
}

#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// the predicate declined to retry; carries the original error
    #[error("{0}")]
    NotRetried(E),

    #[error("Giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::NotRetried(err) => err,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::NotRetried(err) => err,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// run `operation` until it succeeds or retrying stops making sense.
/// The operation is invoked at most `max_retries + 1` times.
pub async fn with_retry<T, E, F, Fut>(
    mut operation: F,
    options: &RetryOptions<E>,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut backoff = options.backoff();
    let mut attempt: u32 = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !(options.retry_predicate)(&err) => {
                tracing::debug!(attempt, error = %err, "Not retrying permanent error");
                return Err(RetryError::NotRetried(err));
            }
            Err(err) => match backoff.next() {
                Some(delay) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Operation failed, retrying"
                    );
                    if let Some(hook) = &options.on_retry {
                        hook(&err, attempt);
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    tracing::error!(attempt, error = %err, "Not retrying error after max number of retries reached");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
            },
        }
    }
}
