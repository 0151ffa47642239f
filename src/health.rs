//! Health checks built on the timeout primitive.
//!
//! A [`HealthCheck`] wraps a probe operation with a deadline and folds
//! every outcome (success, probe error, or deadline expiry) into a
//! [`HealthReport`]. Probing never fails.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stanchion::HealthCheck;
//! use std::time::Duration;
//!
//! let check = HealthCheck::new("database", Duration::from_secs(2), || async {
//!     pool.ping().await
//! });
//!
//! let report = check.probe().await;
//! if !report.healthy {
//!     warn!(error = ?report.error, "database unhealthy");
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

use crate::timeout::{Timeout, TimeoutError};

/// Type alias for the boxed probe operation.
pub type ProbeFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Outcome of a single health probe.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Name of the checked dependency.
    pub name: String,
    /// Whether the probe succeeded within its deadline.
    pub healthy: bool,
    /// Time the probe took to settle (or to be abandoned).
    pub latency: Duration,
    /// When the probe finished.
    pub checked_at: SystemTime,
    /// Failure message, when unhealthy.
    pub error: Option<String>,
}

/// Periodic health probe for one dependency.
#[derive(Clone)]
pub struct HealthCheck {
    name: String,
    timeout: Timeout,
    check: ProbeFn,
}

impl HealthCheck {
    /// Create a new health check.
    ///
    /// Probe errors are rendered through `Display` into the report.
    pub fn new<F, Fut, E>(name: impl Into<String>, deadline: Duration, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let name = name.into();
        Self {
            timeout: Timeout::new(crate::timeout::TimeoutConfig::new(deadline).name(name.clone())),
            name,
            check: Arc::new(move || {
                let fut = check();
                Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
            }),
        }
    }

    /// Get the check name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the probe once. Never fails; every outcome becomes a report.
    pub async fn probe(&self) -> HealthReport {
        let started = Instant::now();
        let outcome = self.timeout.call(|| (self.check)()).await;
        let latency = started.elapsed();

        let error = match outcome {
            Ok(()) => None,
            Err(TimeoutError::Elapsed(d)) => {
                warn!(name = %self.name, deadline = ?d, "Health probe timed out");
                Some(format!("health probe timed out after {:?}", d))
            }
            Err(TimeoutError::Execution(message)) => {
                warn!(name = %self.name, error = %message, "Health probe failed");
                Some(message)
            }
        };

        HealthReport {
            name: self.name.clone(),
            healthy: error.is_none(),
            latency,
            checked_at: SystemTime::now(),
            error,
        }
    }

    /// Probe on an interval, publishing the latest report.
    ///
    /// The first probe runs before this returns, so the channel always
    /// holds a real report. The background task stops once every receiver
    /// is dropped.
    pub async fn watch(&self, period: Duration) -> tokio::sync::watch::Receiver<HealthReport> {
        let initial = self.probe().await;
        let (tx, rx) = tokio::sync::watch::channel(initial);

        let check = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the initial probe covered it
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let report = check.probe().await;
                debug!(
                    name = %check.name,
                    healthy = report.healthy,
                    latency = ?report.latency,
                    "Health probe completed"
                );
                if tx.send(report).is_err() {
                    break;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthy_probe() {
        let check = HealthCheck::new("ok", Duration::from_secs(1), || async {
            Ok::<(), &str>(())
        });

        let report = check.probe().await;
        assert!(report.healthy);
        assert!(report.error.is_none());
        assert_eq!(report.name, "ok");
    }

    #[tokio::test]
    async fn test_failing_probe_is_captured() {
        let check = HealthCheck::new("db", Duration::from_secs(1), || async {
            Err("connection refused")
        });

        let report = check.probe().await;
        assert!(!report.healthy);
        assert_eq!(report.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_times_out() {
        let check = HealthCheck::new("slow", Duration::from_millis(100), || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<(), &str>(())
        });

        let report = check.probe().await;
        assert!(!report.healthy);
        assert!(report.error.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_publishes_reports() {
        let check = HealthCheck::new("watched", Duration::from_secs(1), || async {
            Ok::<(), &str>(())
        });

        let mut rx = check.watch(Duration::from_millis(100)).await;
        assert!(rx.borrow().healthy);

        rx.changed().await.unwrap();
        assert!(rx.borrow().healthy);
    }
}
