//! Retry pattern with configurable backoff strategies.
//!
//! Attempts are strictly sequential; the loop sleeps between attempts
//! according to the configured [`BackoffStrategy`] and can be cancelled
//! through a [`CancellationToken`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use stanchion::{Retry, RetryConfig, BackoffStrategy};
//! use std::time::Duration;
//!
//! let retry = Retry::new(RetryConfig {
//!     max_attempts: 3,
//!     backoff: BackoffStrategy::exponential(Duration::from_millis(100)),
//!     ..Default::default()
//! });
//!
//! let result = retry.call(|| async {
//!     external_service.fetch().await
//! }).await;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff strategy for retries.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear backoff: delay increases by a fixed amount.
    Linear {
        /// Initial delay.
        initial: Duration,
        /// Increment per retry.
        increment: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff: delay doubles each retry.
    Exponential {
        /// Initial delay.
        initial: Duration,
        /// Multiplier (typically 2.0).
        multiplier: f64,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff with jitter.
    ExponentialWithJitter {
        /// Initial delay.
        initial: Duration,
        /// Multiplier (typically 2.0).
        multiplier: f64,
        /// Maximum delay.
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Create constant backoff.
    pub fn constant(delay: Duration) -> Self {
        Self::Constant(delay)
    }

    /// Create linear backoff.
    pub fn linear(initial: Duration, increment: Duration) -> Self {
        Self::Linear {
            initial,
            increment,
            max: Duration::from_secs(60),
        }
    }

    /// Create exponential backoff.
    pub fn exponential(initial: Duration) -> Self {
        Self::Exponential {
            initial,
            multiplier: 2.0,
            max: Duration::from_secs(60),
        }
    }

    /// Create exponential backoff with jitter.
    pub fn exponential_with_jitter(initial: Duration) -> Self {
        Self::ExponentialWithJitter {
            initial,
            multiplier: 2.0,
            max: Duration::from_secs(60),
        }
    }

    /// Set maximum delay.
    pub fn with_max(self, max: Duration) -> Self {
        match self {
            Self::Linear {
                initial, increment, ..
            } => Self::Linear {
                initial,
                increment,
                max,
            },
            Self::Exponential {
                initial, multiplier, ..
            } => Self::Exponential {
                initial,
                multiplier,
                max,
            },
            Self::ExponentialWithJitter {
                initial, multiplier, ..
            } => Self::ExponentialWithJitter {
                initial,
                multiplier,
                max,
            },
            other => other,
        }
    }

    /// Calculate delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Linear {
                initial,
                increment,
                max,
            } => {
                let delay = *initial + increment.saturating_mul(attempt);
                delay.min(*max)
            }
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let factor = multiplier.powi(attempt as i32);
                let millis = (initial.as_millis() as f64 * factor) as u64;
                Duration::from_millis(millis).min(*max)
            }
            Self::ExponentialWithJitter {
                initial,
                multiplier,
                max,
            } => {
                let factor = multiplier.powi(attempt as i32);
                let base_millis = (initial.as_millis() as f64 * factor) as u64;
                // Add jitter: 0-50% of the delay
                let jitter = (base_millis as f64 * rand_factor() * 0.5) as u64;
                Duration::from_millis(base_millis + jitter).min(*max)
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100))
    }
}

/// Generate a random factor between 0.0 and 1.0.
fn rand_factor() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Hook invoked before each backoff sleep with the failed attempt's error,
/// the attempt number (1-based), and the delay about to be waited.
pub type RetryHook = Arc<dyn Fn(&dyn std::fmt::Display, u32, Duration) + Send + Sync>;

/// Retry configuration.
#[derive(Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial one).
    pub max_attempts: u32,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Invoked before each backoff sleep.
    pub on_retry: Option<RetryHook>,
    /// Aborts the retry loop when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            on_retry: None,
            cancel: None,
        }
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("on_retry", &self.on_retry.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the backoff strategy.
    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the retry hook.
    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(&dyn std::fmt::Display, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Set the cancellation token.
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Retry error.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Attempts exhausted or the error was not retryable; wraps the last
    /// underlying error and the number of attempts consumed.
    Exhausted {
        /// Last error encountered.
        last_error: E,
        /// Number of attempts made.
        attempts: u32,
    },
    /// The retry loop was cancelled through its token.
    Aborted,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted {
                last_error,
                attempts,
            } => write!(f, "Failed after {} attempts: {}", attempts, last_error),
            Self::Aborted => write!(f, "Retry aborted"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

impl<E> RetryError<E> {
    /// True when the loop was cancelled rather than exhausted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Number of attempts consumed, if the loop ran to exhaustion.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted { attempts, .. } => Some(*attempts),
            Self::Aborted => None,
        }
    }

    /// Extract the last underlying error, if any.
    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::Exhausted { last_error, .. } => Some(last_error),
            Self::Aborted => None,
        }
    }
}

/// Retry executor.
#[derive(Debug, Clone)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create with default configuration.
    pub fn default_retry() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Get the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute with retry logic, retrying every error.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.call_if(f, |_, _| true).await
    }

    /// Execute with retry logic and a predicate deciding whether an error
    /// is retryable. A non-retryable error stops the loop immediately; the
    /// attempt that produced it still counts as consumed.
    pub async fn call_if<F, Fut, T, E, P>(&self, mut f: F, is_retryable: P) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E, u32) -> bool,
    {
        if self.is_cancelled() {
            return Err(RetryError::Aborted);
        }

        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 0..max_attempts {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "Retry succeeded");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    let attempts_made = attempt + 1;
                    let is_last = attempts_made >= max_attempts;

                    if is_last || !is_retryable(&e, attempts_made) {
                        warn!(
                            attempt = attempts_made,
                            max_attempts = max_attempts,
                            error = %e,
                            "Giving up on retries"
                        );
                        return Err(RetryError::Exhausted {
                            last_error: e,
                            attempts: attempts_made,
                        });
                    }

                    let delay = self.config.backoff.delay_for_attempt(attempt);
                    debug!(
                        attempt = attempts_made,
                        delay = ?delay,
                        error = %e,
                        "Retry attempt failed, waiting before retry"
                    );

                    if let Some(hook) = &self.config.on_retry {
                        hook(&e, attempts_made, delay);
                    }

                    if !self.sleep(delay).await {
                        return Err(RetryError::Aborted);
                    }
                }
            }
        }

        unreachable!("retry loop returns on the last attempt")
    }

    fn is_cancelled(&self) -> bool {
        self.config
            .cancel
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }

    /// Sleep between attempts. Returns false when cancelled.
    async fn sleep(&self, delay: Duration) -> bool {
        match &self.config.cancel {
            Some(token) => {
                if delay.is_zero() {
                    return !token.is_cancelled();
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = token.cancelled() => false,
                }
            }
            None => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                true
            }
        }
    }
}

/// Retry an operation with the given configuration.
///
/// Convenience for one-off calls without constructing a [`Retry`].
pub async fn retry<F, Fut, T, E>(config: RetryConfig, f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    Retry::new(config).call(f).await
}
