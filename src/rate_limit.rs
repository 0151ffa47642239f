//! Token-bucket rate limiting for a single protected resource.
//!
//! Tokens refill continuously in proportion to elapsed time, capped at the
//! configured burst capacity. Each admission consumes one token. With
//! `queue_excess` enabled, over-quota callers wait in FIFO order for the
//! bucket to refill instead of being rejected.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stanchion::{RateLimiter, RateLimiterConfig};
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new(RateLimiterConfig {
//!     max_requests: 100,
//!     interval: Duration::from_secs(1),
//!     ..Default::default()
//! });
//!
//! if limiter.try_acquire() {
//!     upstream.send(request).await?;
//! }
//! ```

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Name of the rate limiter (for logging/metrics).
    pub name: String,
    /// Maximum tokens (burst capacity) and refill amount per interval.
    pub max_requests: u32,
    /// Interval over which `max_requests` tokens are replenished.
    pub interval: Duration,
    /// Queue over-quota `acquire` calls instead of rejecting them.
    pub queue_excess: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_requests: 100,
            interval: Duration::from_secs(1),
            queue_excess: false,
        }
    }
}

impl RateLimiterConfig {
    /// Create a new configuration.
    pub fn new(max_requests: u32, interval: Duration) -> Self {
        Self {
            max_requests,
            interval,
            ..Default::default()
        }
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Queue over-quota callers instead of rejecting them.
    pub fn queue_excess(mut self, queue: bool) -> Self {
        self.queue_excess = queue;
        self
    }
}

/// An over-quota call was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Rate limit exceeded, retry after {retry_after:?}")]
pub struct RateLimitExceeded {
    /// Time until the next token becomes available.
    pub retry_after: Duration,
}

/// Rate limiter error for wrapped executions.
#[derive(Debug)]
pub enum RateLimitError<E> {
    /// The call was rejected before running the operation.
    Exceeded(RateLimitExceeded),
    /// The operation ran and failed.
    Execution(E),
}

impl<E: std::fmt::Display> std::fmt::Display for RateLimitError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exceeded(e) => write!(f, "{}", e),
            Self::Execution(e) => write!(f, "Execution failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RateLimitError<E> {}

/// Token bucket state.
struct BucketState {
    /// Current number of tokens.
    tokens: f64,
    /// Last time tokens were added.
    last_refill: Instant,
}

/// Token-bucket rate limiter guarding one resource.
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: Mutex<BucketState>,
    /// Serializes queued waiters in FIFO order.
    queue: tokio::sync::Mutex<()>,
    /// Wakes the waiter at the head of the queue on `reset`.
    reset_notify: Notify,
    waiting: AtomicU32,
    total_admitted: AtomicU64,
    total_rejected: AtomicU64,
    total_queued: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Panics
    ///
    /// Panics if `max_requests` is 0 or `interval` is zero.
    pub fn new(config: RateLimiterConfig) -> Arc<Self> {
        assert!(config.max_requests > 0, "max_requests must be greater than 0");
        assert!(!config.interval.is_zero(), "interval must be greater than 0");

        info!(
            name = %config.name,
            max_requests = config.max_requests,
            interval = ?config.interval,
            "Rate limiter initialized"
        );

        Arc::new(Self {
            bucket: Mutex::new(BucketState {
                tokens: config.max_requests as f64,
                last_refill: Instant::now(),
            }),
            config,
            queue: tokio::sync::Mutex::new(()),
            reset_notify: Notify::new(),
            waiting: AtomicU32::new(0),
            total_admitted: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_queued: AtomicU64::new(0),
        })
    }

    /// Get the rate limiter name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Tokens replenished per second.
    fn refill_rate(&self) -> f64 {
        self.config.max_requests as f64 / self.config.interval.as_secs_f64()
    }

    /// Refill tokens based on elapsed time.
    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        let new_tokens = elapsed * self.refill_rate();

        state.tokens = (state.tokens + new_tokens).min(self.config.max_requests as f64);
        state.last_refill = now;
    }

    /// Try to consume a token without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.bucket.lock();
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            self.total_admitted.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Acquire a token, waiting in FIFO order when `queue_excess` is set.
    ///
    /// Without queueing, an over-quota call returns [`RateLimitExceeded`]
    /// carrying the time until the next token.
    pub async fn acquire(&self) -> Result<(), RateLimitExceeded> {
        if self.try_acquire() {
            return Ok(());
        }

        if !self.config.queue_excess {
            let retry_after = self.retry_after();
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            debug!(
                name = %self.config.name,
                retry_after = ?retry_after,
                "Rate limit exceeded"
            );
            return Err(RateLimitExceeded { retry_after });
        }

        self.total_queued.fetch_add(1, Ordering::Relaxed);
        self.waiting.fetch_add(1, Ordering::SeqCst);

        // Waiters line up on the queue mutex; the head waiter sleeps until
        // the bucket refills (or a reset refills it early).
        let _head = self.queue.lock().await;
        loop {
            if self.try_acquire() {
                self.waiting.fetch_sub(1, Ordering::SeqCst);
                return Ok(());
            }

            let wait = self.retry_after();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.reset_notify.notified() => {}
            }
        }
    }

    /// Acquire a token, then invoke the operation.
    pub async fn run<F, Fut, T, E>(&self, f: F) -> Result<T, RateLimitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire().await.map_err(RateLimitError::Exceeded)?;
        f().await.map_err(RateLimitError::Execution)
    }

    /// Current refill-adjusted token count, without consuming one.
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.bucket.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Time until the next token becomes available.
    pub fn retry_after(&self) -> Duration {
        let mut state = self.bucket.lock();
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - state.tokens) / self.refill_rate())
        }
    }

    /// Number of callers currently queued.
    pub fn queue_len(&self) -> u32 {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Restore the bucket to full capacity.
    ///
    /// Queued waiters drain immediately against the refilled bucket.
    pub fn reset(&self) {
        let mut state = self.bucket.lock();
        state.tokens = self.config.max_requests as f64;
        state.last_refill = Instant::now();
        drop(state);

        self.reset_notify.notify_waiters();
        debug!(name = %self.config.name, "Rate limiter reset");
    }

    /// Get rate limiter statistics.
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            name: self.config.name.clone(),
            max_requests: self.config.max_requests,
            available_tokens: self.available_tokens(),
            queued: self.queue_len(),
            total_admitted: self.total_admitted.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_queued: self.total_queued.load(Ordering::Relaxed),
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    /// Rate limiter name.
    pub name: String,
    /// Burst capacity.
    pub max_requests: u32,
    /// Refill-adjusted tokens currently available.
    pub available_tokens: f64,
    /// Callers currently queued.
    pub queued: u32,
    /// Total admitted calls.
    pub total_admitted: u64,
    /// Total rejected calls.
    pub total_rejected: u64,
    /// Total calls that entered the queue.
    pub total_queued: u64,
}
