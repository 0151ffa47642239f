//! Hedged requests for tail-latency reduction.
//!
//! A hedge launches redundant attempts of the same operation, staggered a
//! fixed delay apart, and resolves with whichever attempt succeeds first.
//! Remaining attempts are dropped once a winner settles. Hedging trades
//! extra load on the dependency for lower tail latency; it is not a retry
//! substitute.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stanchion::{Hedge, HedgeConfig};
//! use std::time::Duration;
//!
//! let hedge = Hedge::new(HedgeConfig {
//!     attempts: 3,
//!     stagger: Duration::from_millis(50),
//!     ..Default::default()
//! });
//!
//! let result = hedge.call(|| async {
//!     replica.read(key).await
//! }).await;
//! ```

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Hedge configuration.
#[derive(Debug, Clone)]
pub struct HedgeConfig {
    /// Name of the hedge (for logging/metrics).
    pub name: String,
    /// Maximum number of attempts launched.
    pub attempts: u32,
    /// Delay between attempt launches.
    pub stagger: Duration,
    /// Aborts the race when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            attempts: 2,
            stagger: Duration::from_millis(50),
            cancel: None,
        }
    }
}

impl HedgeConfig {
    /// Create a new configuration.
    pub fn new(attempts: u32, stagger: Duration) -> Self {
        Self {
            attempts,
            stagger,
            ..Default::default()
        }
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the cancellation token.
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Hedge error.
#[derive(Debug)]
pub enum HedgeError<E> {
    /// The race was cancelled through its token.
    Aborted,
    /// Every attempt failed; wraps the last error observed.
    Execution(E),
}

impl<E: std::fmt::Display> std::fmt::Display for HedgeError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aborted => write!(f, "Hedge aborted"),
            Self::Execution(e) => write!(f, "All hedged attempts failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for HedgeError<E> {}

/// Hedge executor.
#[derive(Debug, Clone)]
pub struct Hedge {
    config: HedgeConfig,
}

impl Hedge {
    /// Create a new hedge executor.
    pub fn new(config: HedgeConfig) -> Self {
        Self { config }
    }

    /// Create with an attempt count and stagger delay.
    pub fn with_attempts(attempts: u32, stagger: Duration) -> Self {
        Self::new(HedgeConfig::new(attempts, stagger))
    }

    /// Get the configuration.
    pub fn config(&self) -> &HedgeConfig {
        &self.config
    }

    /// Race staggered attempts of the operation, first success wins.
    ///
    /// A new attempt is launched every `stagger` until `attempts` are in
    /// flight or one has succeeded. When every in-flight attempt has
    /// already failed, the next one is launched immediately rather than
    /// waiting out the stagger. Losing attempts are dropped.
    pub async fn call<F, Fut, T, E>(&self, mut f: F) -> Result<T, HedgeError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.config.attempts.max(1);
        let cancel = self.config.cancel.clone();

        if cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
            return Err(HedgeError::Aborted);
        }

        let mut inflight = FuturesUnordered::new();
        inflight.push(f());
        let mut launched = 1u32;
        let mut last_error: Option<E> = None;
        let mut next_launch = tokio::time::Instant::now() + self.config.stagger;

        loop {
            let settled = if launched < attempts {
                tokio::select! {
                    _ = cancelled(&cancel) => return Err(HedgeError::Aborted),
                    _ = tokio::time::sleep_until(next_launch) => {
                        debug!(
                            name = %self.config.name,
                            attempt = launched + 1,
                            "Launching hedged attempt"
                        );
                        inflight.push(f());
                        launched += 1;
                        next_launch += self.config.stagger;
                        continue;
                    }
                    settled = inflight.next() => settled,
                }
            } else {
                tokio::select! {
                    _ = cancelled(&cancel) => return Err(HedgeError::Aborted),
                    settled = inflight.next() => settled,
                }
            };

            match settled {
                Some(Ok(value)) => return Ok(value),
                Some(Err(e)) => {
                    debug!(name = %self.config.name, error = %e, "Hedged attempt failed");
                    last_error = Some(e);
                    if inflight.is_empty() {
                        if launched < attempts {
                            // Everything in flight has failed; no point
                            // waiting out the stagger
                            inflight.push(f());
                            launched += 1;
                            next_launch = tokio::time::Instant::now() + self.config.stagger;
                        } else if let Some(e) = last_error.take() {
                            return Err(HedgeError::Execution(e));
                        }
                    }
                }
                None => unreachable!("the in-flight set is refilled before it drains"),
            }
        }
    }
}

async fn cancelled(cancel: &Option<CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => futures::future::pending().await,
    }
}

/// Race `attempts` staggered invocations of the operation.
///
/// Convenience for one-off calls without constructing a [`Hedge`].
pub async fn hedge<F, Fut, T, E>(
    attempts: u32,
    stagger: Duration,
    f: F,
) -> Result<T, HedgeError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    Hedge::with_attempts(attempts, stagger).call(f).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_first_attempt_wins() {
        let launches = AtomicU32::new(0);
        let hedge = Hedge::with_attempts(3, Duration::from_millis(50));

        let result: Result<i32, HedgeError<&str>> = hedge
            .call(|| {
                launches.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_primary_loses_to_hedge() {
        let launches = Arc::new(AtomicU32::new(0));
        let hedge = Hedge::with_attempts(2, Duration::from_millis(50));

        let result: Result<u32, HedgeError<&str>> = hedge
            .call(|| {
                let attempt = launches.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        // Primary is slow
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    Ok(attempt)
                }
            })
            .await;

        // The second, staggered attempt settles first
        assert_eq!(result.unwrap(), 1);
        assert_eq!(launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_attempts_fail() {
        let launches = AtomicU32::new(0);
        let hedge = Hedge::with_attempts(3, Duration::from_millis(10));

        let result: Result<i32, HedgeError<&str>> = hedge
            .call(|| {
                launches.fetch_add(1, Ordering::SeqCst);
                async { Err("down") }
            })
            .await;

        assert!(matches!(result, Err(HedgeError::Execution("down"))));
        assert_eq!(launches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_do_not_wait_out_stagger() {
        let launches = AtomicU32::new(0);
        let hedge = Hedge::with_attempts(3, Duration::from_secs(3600));

        let started = tokio::time::Instant::now();
        let result: Result<i32, HedgeError<&str>> = hedge
            .call(|| {
                launches.fetch_add(1, Ordering::SeqCst);
                async { Err("down") }
            })
            .await;

        assert!(matches!(result, Err(HedgeError::Execution(_))));
        // Fast failures trigger immediate follow-up launches
        assert!(started.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_aborts() {
        let token = CancellationToken::new();
        token.cancel();

        let hedge = Hedge::new(HedgeConfig::new(2, Duration::from_millis(10)).cancel(token));

        let result: Result<i32, HedgeError<&str>> = hedge.call(|| async { Ok(42) }).await;
        assert!(matches!(result, Err(HedgeError::Aborted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_race_aborts() {
        let token = CancellationToken::new();
        let hedge = Hedge::new(
            HedgeConfig::new(2, Duration::from_millis(50)).cancel(token.clone()),
        );

        let race = tokio::spawn(async move {
            hedge
                .call(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<i32, &str>(42)
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let result = race.await.unwrap();
        assert!(matches!(result, Err(HedgeError::Aborted)));
    }
}
