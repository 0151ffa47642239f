//! Bulkhead pattern for resource isolation.
//!
//! The bulkhead bounds the number of concurrently running operations and
//! the number of callers allowed to wait for a slot. Slots are handed to
//! waiters in FIFO order; everything past the wait queue is rejected
//! immediately.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stanchion::{Bulkhead, BulkheadConfig};
//!
//! let bulkhead = Bulkhead::new(BulkheadConfig {
//!     max_concurrent: 10,
//!     max_queue: Some(50),
//!     ..Default::default()
//! });
//!
//! let result = bulkhead.call(|| async {
//!     expensive_operation().await
//! }).await;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Bulkhead configuration.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Name of the bulkhead (for logging/metrics).
    pub name: String,
    /// Maximum concurrent executions.
    pub max_concurrent: u32,
    /// Maximum callers allowed to wait for a slot. `None` means unbounded.
    pub max_queue: Option<u32>,
    /// Maximum time to wait for a slot. `None` means wait indefinitely.
    pub max_wait: Option<Duration>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_concurrent: 10,
            max_queue: None,
            max_wait: None,
        }
    }
}

impl BulkheadConfig {
    /// Create a new configuration.
    pub fn new(name: impl Into<String>, max_concurrent: u32) -> Self {
        Self {
            name: name.into(),
            max_concurrent,
            ..Default::default()
        }
    }

    /// Bound the wait queue.
    pub fn max_queue(mut self, size: u32) -> Self {
        self.max_queue = Some(size);
        self
    }

    /// Bound the time spent waiting for a slot.
    pub fn max_wait(mut self, duration: Duration) -> Self {
        self.max_wait = Some(duration);
        self
    }
}

/// A call could not be admitted to the bulkhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BulkheadRejection {
    /// All slots busy and the wait queue is full.
    #[error("Bulkhead is full")]
    Full,
    /// Timed out waiting for a slot.
    #[error("Timed out waiting for a bulkhead slot")]
    WaitTimeout,
}

/// Bulkhead error for wrapped executions.
#[derive(Debug)]
pub enum BulkheadError<E> {
    /// All slots busy and the wait queue is full.
    Full,
    /// Timed out waiting for a slot.
    WaitTimeout,
    /// The operation ran and failed.
    Execution(E),
}

impl<E> From<BulkheadRejection> for BulkheadError<E> {
    fn from(rejection: BulkheadRejection) -> Self {
        match rejection {
            BulkheadRejection::Full => Self::Full,
            BulkheadRejection::WaitTimeout => Self::WaitTimeout,
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for BulkheadError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "Bulkhead is full"),
            Self::WaitTimeout => write!(f, "Timed out waiting for a bulkhead slot"),
            Self::Execution(e) => write!(f, "Execution failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for BulkheadError<E> {}

/// RAII guard for an occupied bulkhead slot.
///
/// The slot is released when the permit is dropped.
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
    running: Arc<AtomicU32>,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bulkhead limiting concurrent access to a resource.
pub struct Bulkhead {
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicU32>,
    waiting: AtomicU32,
    total_calls: AtomicU64,
    total_rejections: AtomicU64,
    total_timeouts: AtomicU64,
}

impl Bulkhead {
    /// Create a new bulkhead.
    pub fn new(config: BulkheadConfig) -> Arc<Self> {
        info!(
            name = %config.name,
            max_concurrent = config.max_concurrent,
            max_queue = ?config.max_queue,
            "Bulkhead initialized"
        );

        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent as usize)),
            config,
            running: Arc::new(AtomicU32::new(0)),
            waiting: AtomicU32::new(0),
            total_calls: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
        })
    }

    /// Get the bulkhead name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current number of running executions.
    pub fn running(&self) -> u32 {
        self.running.load(Ordering::SeqCst)
    }

    /// Current number of callers waiting for a slot.
    pub fn queue_len(&self) -> u32 {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Whether a call would run without waiting.
    pub fn is_available(&self) -> bool {
        self.semaphore.available_permits() > 0
    }

    /// Acquire a slot, waiting in FIFO order if necessary.
    ///
    /// Returns a guard that releases the slot on drop. Used by [`call`];
    /// exposed for callers that need to hold a slot across a larger piece
    /// of work.
    ///
    /// [`call`]: Bulkhead::call
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadRejection> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(self.occupy(permit));
        }

        if let Some(max_queue) = self.config.max_queue
            && self.waiting.load(Ordering::SeqCst) >= max_queue
        {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(name = %self.config.name, "Bulkhead queue full, rejecting call");
            return Err(BulkheadRejection::Full);
        }

        self.waiting.fetch_add(1, Ordering::SeqCst);
        let acquired = match self.config.max_wait {
            Some(max_wait) => {
                match tokio::time::timeout(
                    max_wait,
                    Arc::clone(&self.semaphore).acquire_owned(),
                )
                .await
                {
                    Ok(result) => result.ok(),
                    Err(_) => {
                        self.waiting.fetch_sub(1, Ordering::SeqCst);
                        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            name = %self.config.name,
                            max_wait = ?max_wait,
                            "Timed out waiting for a bulkhead slot"
                        );
                        return Err(BulkheadRejection::WaitTimeout);
                    }
                }
            }
            None => Arc::clone(&self.semaphore).acquire_owned().await.ok(),
        };
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        match acquired {
            Some(permit) => Ok(self.occupy(permit)),
            // Semaphore closed (does not happen: we never close it)
            None => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                Err(BulkheadRejection::Full)
            }
        }
    }

    fn occupy(&self, permit: tokio::sync::OwnedSemaphorePermit) -> BulkheadPermit {
        self.running.fetch_add(1, Ordering::SeqCst);
        BulkheadPermit {
            _permit: permit,
            running: Arc::clone(&self.running),
        }
    }

    /// Execute with bulkhead protection.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let _permit = self.acquire().await?;
        f().await.map_err(BulkheadError::Execution)
    }

    /// Execute immediately or reject without waiting.
    pub async fn try_call<F, Fut, T, E>(&self, f: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => self.occupy(permit),
            Err(_) => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                return Err(BulkheadError::Full);
            }
        };

        let result = f().await;
        drop(permit);

        result.map_err(BulkheadError::Execution)
    }

    /// Get bulkhead statistics.
    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            name: self.config.name.clone(),
            max_concurrent: self.config.max_concurrent,
            running: self.running(),
            waiting: self.queue_len(),
            available_slots: self.semaphore.available_permits() as u32,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Bulkhead statistics.
#[derive(Debug, Clone)]
pub struct BulkheadStats {
    /// Bulkhead name.
    pub name: String,
    /// Maximum concurrent executions.
    pub max_concurrent: u32,
    /// Current running executions.
    pub running: u32,
    /// Current waiting callers.
    pub waiting: u32,
    /// Free slots.
    pub available_slots: u32,
    /// Total calls.
    pub total_calls: u64,
    /// Total rejections.
    pub total_rejections: u64,
    /// Total wait timeouts.
    pub total_timeouts: u64,
}

impl BulkheadStats {
    /// Calculate utilization (0.0 - 1.0).
    pub fn utilization(&self) -> f64 {
        self.running as f64 / self.max_concurrent as f64
    }
}
