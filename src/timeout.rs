//! Timeout pattern for operations.
//!
//! Races an operation against a deadline. When the deadline fires first,
//! [`Timeout::call`] drops the in-flight future, which cancels it, so
//! the underlying work stops. Use [`Timeout::call_detached`] to let the
//! operation keep running unobserved instead (only the caller's wait is
//! abandoned).
//!
//! ## Example
//!
//! ```rust,ignore
//! use stanchion::{Timeout, TimeoutConfig};
//! use std::time::Duration;
//!
//! let timeout = Timeout::with_duration(Duration::from_secs(5));
//!
//! let result = timeout.call(|| async {
//!     slow_operation().await
//! }).await;
//! ```

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Timeout configuration.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Name for logging/metrics.
    pub name: String,
    /// Timeout duration.
    pub duration: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            duration: Duration::from_secs(30),
        }
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Timeout error.
#[derive(Debug)]
pub enum TimeoutError<E> {
    /// The deadline elapsed before the operation settled.
    Elapsed(Duration),
    /// The operation settled in time but failed.
    Execution(E),
}

impl<E: std::fmt::Display> std::fmt::Display for TimeoutError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Elapsed(d) => write!(f, "Operation timed out after {:?}", d),
            Self::Execution(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for TimeoutError<E> {}

impl<E> TimeoutError<E> {
    /// True when the deadline elapsed.
    pub fn is_elapsed(&self) -> bool {
        matches!(self, Self::Elapsed(_))
    }
}

/// Timeout executor.
#[derive(Debug, Clone)]
pub struct Timeout {
    config: TimeoutConfig,
}

impl Timeout {
    /// Create a new timeout executor.
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    /// Create with a duration.
    pub fn with_duration(duration: Duration) -> Self {
        Self::new(TimeoutConfig::new(duration))
    }

    /// Get the timeout duration.
    pub fn duration(&self) -> Duration {
        self.config.duration
    }

    /// Execute with a deadline.
    ///
    /// The in-flight future is dropped (and thereby cancelled) when the
    /// deadline fires.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, TimeoutError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.config.duration, f()).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(TimeoutError::Execution(e)),
            Err(_) => {
                warn!(
                    name = %self.config.name,
                    duration = ?self.config.duration,
                    "Operation timed out"
                );
                Err(TimeoutError::Elapsed(self.config.duration))
            }
        }
    }

    /// Execute with a deadline, returning the result directly.
    pub async fn call_infallible<F, Fut, T>(&self, f: F) -> Result<T, Duration>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match tokio::time::timeout(self.config.duration, f()).await {
            Ok(result) => Ok(result),
            Err(_) => Err(self.config.duration),
        }
    }

    /// Execute with a deadline without cancelling the operation.
    ///
    /// The operation is spawned on the runtime; when the deadline fires
    /// only the caller's wait is abandoned and the spawned work keeps
    /// running to completion unobserved.
    pub async fn call_detached<F, Fut, T, E>(&self, f: F) -> Result<T, TimeoutError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let handle = tokio::spawn(f());

        match tokio::time::timeout(self.config.duration, handle).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(e))) => Err(TimeoutError::Execution(e)),
            Ok(Err(join_error)) => match join_error.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                // The task is never aborted; a join error is a panic
                Err(_) => Err(TimeoutError::Elapsed(self.config.duration)),
            },
            Err(_) => {
                warn!(
                    name = %self.config.name,
                    duration = ?self.config.duration,
                    "Operation timed out, leaving it running detached"
                );
                Err(TimeoutError::Elapsed(self.config.duration))
            }
        }
    }
}

/// Execute a future with a timeout.
pub async fn with_timeout<F, Fut, T>(duration: Duration, f: F) -> Result<T, Duration>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    match tokio::time::timeout(duration, f()).await {
        Ok(result) => Ok(result),
        Err(_) => Err(duration),
    }
}

/// Execute a fallible future with a timeout.
pub async fn with_timeout_result<F, Fut, T, E>(
    duration: Duration,
    f: F,
) -> Result<T, TimeoutError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    Timeout::with_duration(duration).call(f).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_completes_in_time() {
        let timeout = Timeout::with_duration(Duration::from_secs(1));

        let result: Result<i32, TimeoutError<&str>> = timeout.call(|| async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let timeout = Timeout::with_duration(Duration::from_millis(100));

        let result: Result<i32, TimeoutError<&str>> = timeout
            .call(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(42)
            })
            .await;

        match result.unwrap_err() {
            TimeoutError::Elapsed(d) => assert_eq!(d, Duration::from_millis(100)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execution_error_passes_through() {
        let timeout = Timeout::with_duration(Duration::from_secs(1));

        let result: Result<i32, TimeoutError<&str>> =
            timeout.call(|| async { Err("boom") }).await;

        assert!(matches!(result, Err(TimeoutError::Execution("boom"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_drops_inflight_work() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let timeout = Timeout::with_duration(Duration::from_millis(50));
        let result: Result<(), TimeoutError<&str>> = timeout
            .call(|| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_elapsed());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_detached_leaves_work_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let timeout = Timeout::with_duration(Duration::from_millis(50));
        let result: Result<(), TimeoutError<&str>> = timeout
            .call_detached(move || async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_elapsed());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_function_helpers() {
        let result = with_timeout(Duration::from_millis(50), || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            42
        })
        .await;
        assert_eq!(result.unwrap_err(), Duration::from_millis(50));

        let result: Result<i32, TimeoutError<&str>> =
            with_timeout_result(Duration::from_secs(1), || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
