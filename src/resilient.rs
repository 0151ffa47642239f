//! Composition of resilience primitives around a single operation.
//!
//! [`Resilient`] applies the enabled wrappers in a fixed order, outermost
//! to innermost:
//!
//! ```text
//! fallback → circuit breaker → rate limit → bulkhead → retry → timeout
//! ```
//!
//! Consequences of the ordering:
//!
//! - each retry attempt runs under its own timeout window;
//! - the circuit breaker records one outcome per call: a retry-exhausted
//!   failure counts once, not once per attempt;
//! - rate-limit admission is paid once per call, not per attempt;
//! - the fallback is the only layer that may swallow an error.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stanchion::{Resilient, RetryConfig, CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("catalog"));
//!
//! let resilient = Resilient::new("catalog")
//!     .timeout(Duration::from_secs(2))
//!     .retry(RetryConfig::new(3))
//!     .circuit_breaker(breaker);
//!
//! let result = resilient.call(|| async {
//!     catalog.fetch(id).await
//! }).await;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::bulkhead::{Bulkhead, BulkheadRejection};
use crate::circuit_breaker::CircuitBreaker;
use crate::rate_limit::RateLimiter;
use crate::retry::{Retry, RetryConfig, RetryError};
use crate::timeout::{Timeout, TimeoutError};

/// Flattened error for composed calls.
///
/// Every variant is recoverable; none represents a process-fatal condition.
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// Rejected by an open circuit breaker without running the operation.
    CircuitOpen,
    /// Rejected by the rate limiter.
    RateLimited {
        /// Time until the next token becomes available.
        retry_after: Duration,
    },
    /// Rejected because the bulkhead and its queue are full.
    BulkheadFull,
    /// Timed out waiting for a bulkhead slot.
    BulkheadWaitTimeout,
    /// The operation exceeded its timeout window.
    Timeout(Duration),
    /// Every retry attempt failed; wraps the last attempt's outcome.
    RetryExhausted {
        /// Number of attempts consumed.
        attempts: u32,
        /// The final attempt's error.
        last_error: Box<ResilienceError<E>>,
    },
    /// The call was cancelled through a token.
    Aborted,
    /// The operation ran and failed.
    Execution(E),
}

impl<E: std::fmt::Display> std::fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen => write!(f, "Circuit breaker is open"),
            Self::RateLimited { retry_after } => {
                write!(f, "Rate limit exceeded, retry after {:?}", retry_after)
            }
            Self::BulkheadFull => write!(f, "Bulkhead is full"),
            Self::BulkheadWaitTimeout => write!(f, "Timed out waiting for a bulkhead slot"),
            Self::Timeout(d) => write!(f, "Operation timed out after {:?}", d),
            Self::RetryExhausted {
                attempts,
                last_error,
            } => write!(f, "All {} attempts failed: {}", attempts, last_error),
            Self::Aborted => write!(f, "Call aborted"),
            Self::Execution(e) => write!(f, "Execution failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for ResilienceError<E> {}

impl<E> ResilienceError<E> {
    /// True when the call was rejected before the operation ran.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen
                | Self::RateLimited { .. }
                | Self::BulkheadFull
                | Self::BulkheadWaitTimeout
        )
    }

    /// True when the operation itself ran and failed (directly, by timeout,
    /// or through retry exhaustion).
    fn operation_ran(&self) -> bool {
        !self.is_rejection() && !matches!(self, Self::Aborted)
    }
}

impl<E> From<TimeoutError<E>> for ResilienceError<E> {
    fn from(error: TimeoutError<E>) -> Self {
        match error {
            TimeoutError::Elapsed(d) => Self::Timeout(d),
            TimeoutError::Execution(e) => Self::Execution(e),
        }
    }
}

/// Type alias for the composed recovery handler.
pub type RecoveryFn<T, E> = Arc<
    dyn Fn(ResilienceError<E>) -> Pin<Box<dyn Future<Output = Result<T, ResilienceError<E>>> + Send>>
        + Send
        + Sync,
>;

/// Fixed-order composition of resilience wrappers around one operation.
///
/// Stateful components (circuit breaker, rate limiter, bulkhead) are taken
/// as shared handles so their state outlives any one `Resilient` and can be
/// shared with other call sites guarding the same resource.
pub struct Resilient<T, E> {
    name: String,
    timeout: Option<Timeout>,
    retry: Option<Retry>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    bulkhead: Option<Arc<Bulkhead>>,
    fallback: Option<RecoveryFn<T, E>>,
}

impl<T, E> Resilient<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create a composition with no wrappers enabled.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            retry: None,
            circuit_breaker: None,
            rate_limiter: None,
            bulkhead: None,
            fallback: None,
        }
    }

    /// Get the composition name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound each attempt with a timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(Timeout::new(
            crate::timeout::TimeoutConfig::new(duration).name(self.name.clone()),
        ));
        self
    }

    /// Retry failing attempts.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(Retry::new(config));
        self
    }

    /// Gate calls through a circuit breaker.
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Gate calls through a rate limiter.
    pub fn rate_limit(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Bound concurrent calls with a bulkhead.
    pub fn bulkhead(mut self, bulkhead: Arc<Bulkhead>) -> Self {
        self.bulkhead = Some(bulkhead);
        self
    }

    /// Recover from any composed error with an async handler.
    pub fn fallback<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ResilienceError<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |e| Box::pin(handler(e))));
        self
    }

    /// Recover from any composed error with a constant value.
    pub fn fallback_value(self, value: T) -> Self
    where
        T: Clone + Sync,
    {
        self.fallback(move |_| {
            let v = value.clone();
            async move { Ok(v) }
        })
    }

    /// Execute the operation through the composed wrappers.
    pub async fn call<F, Fut>(&self, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match self.call_protected(f).await {
            Ok(value) => Ok(value),
            Err(error) => match &self.fallback {
                Some(recover) => {
                    debug!(name = %self.name, error = %error, "Recovering through fallback");
                    recover(error).await
                }
                None => Err(error),
            },
        }
    }

    /// Everything inside the fallback layer.
    async fn call_protected<F, Fut>(&self, mut f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if let Some(breaker) = &self.circuit_breaker
            && !breaker.is_allowed()
        {
            return Err(ResilienceError::CircuitOpen);
        }

        let result = self.call_admitted(&mut f).await;

        // One outcome per logical call: the breaker sees retry exhaustion
        // as a single failure. Admission rejections and aborts never ran
        // the operation and are not counted.
        if let Some(breaker) = &self.circuit_breaker {
            match &result {
                Ok(_) => breaker.record_success(),
                Err(e) if e.operation_ran() => breaker.record_failure(),
                Err(_) => {}
            }
        }

        result
    }

    /// Everything inside the circuit breaker layer.
    async fn call_admitted<F, Fut>(&self, f: &mut F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if let Some(limiter) = &self.rate_limiter {
            limiter
                .acquire()
                .await
                .map_err(|e| ResilienceError::RateLimited {
                    retry_after: e.retry_after,
                })?;
        }

        // The slot is held across the whole retry sequence
        let _slot = match &self.bulkhead {
            Some(bulkhead) => Some(bulkhead.acquire().await.map_err(|r| match r {
                BulkheadRejection::Full => ResilienceError::BulkheadFull,
                BulkheadRejection::WaitTimeout => ResilienceError::BulkheadWaitTimeout,
            })?),
            None => None,
        };

        match &self.retry {
            Some(retry) => {
                let timeout = self.timeout.clone();
                let outcome = retry
                    .call(|| {
                        let attempt = f();
                        let timeout = timeout.clone();
                        async move { run_attempt(timeout, attempt).await }
                    })
                    .await;

                match outcome {
                    Ok(value) => Ok(value),
                    Err(RetryError::Aborted) => Err(ResilienceError::Aborted),
                    Err(RetryError::Exhausted {
                        last_error,
                        attempts,
                    }) => Err(ResilienceError::RetryExhausted {
                        attempts,
                        last_error: Box::new(last_error.into()),
                    }),
                }
            }
            None => run_attempt(self.timeout.clone(), f())
                .await
                .map_err(Into::into),
        }
    }
}

/// Run a single attempt under the optional timeout.
async fn run_attempt<Fut, T, E>(
    timeout: Option<Timeout>,
    attempt: Fut,
) -> Result<T, TimeoutError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match timeout {
        Some(timeout) => timeout.call(move || attempt).await,
        None => attempt.await.map_err(TimeoutError::Execution),
    }
}

impl<T, E> Clone for Resilient<T, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            timeout: self.timeout.clone(),
            retry: self.retry.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            rate_limiter: self.rate_limiter.clone(),
            bulkhead: self.bulkhead.clone(),
            fallback: self.fallback.clone(),
        }
    }
}
