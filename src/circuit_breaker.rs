//! Circuit Breaker pattern implementation.
//!
//! The circuit breaker prevents cascade failures by monitoring a dependency
//! for failures and "opening" to reject calls once a failure threshold is
//! reached, probing periodically for recovery.
//!
//! ## States
//!
//! - **Closed**: Normal operation, calls pass through
//! - **Open**: Circuit is tripped, calls are rejected immediately
//! - **Half-Open**: Testing whether the dependency has recovered
//!
//! ## Example
//!
//! ```rust,ignore
//! use stanchion::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let circuit = CircuitBreaker::new(CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     recovery_timeout: Duration::from_secs(30),
//!     ..Default::default()
//! });
//!
//! let result = circuit.call(|| async {
//!     external_service.fetch_data().await
//! }).await;
//!
//! match result {
//!     Ok(data) => handle(data),
//!     Err(CircuitBreakerError::Open) => serve_degraded(),
//!     Err(CircuitBreakerError::Execution(e)) => report(e),
//! }
//! ```

use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit is half-open, trial calls test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Hook invoked on every state transition with `(from, to)`.
pub type StateChangeHook = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Circuit breaker configuration.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Name of the circuit breaker (for logging/metrics).
    pub name: String,
    /// Number of consecutive qualifying failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait after opening before admitting trial calls.
    pub recovery_timeout: Duration,
    /// Number of trial successes needed to close the circuit from half-open.
    pub success_threshold: u32,
    /// Number of trial calls admitted in half-open state.
    pub half_open_probes: u32,
    /// Invoked on every state transition.
    pub on_state_change: Option<StateChangeHook>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 1,
            half_open_probes: 1,
            on_state_change: None,
        }
    }
}

impl std::fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .field("success_threshold", &self.success_threshold)
            .field("half_open_probes", &self.half_open_probes)
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the consecutive-failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the recovery timeout.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Set the success threshold for closing from half-open.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the number of trial calls admitted in half-open state.
    pub fn half_open_probes(mut self, count: u32) -> Self {
        self.half_open_probes = count;
        self
    }

    /// Set the state-change hook.
    pub fn on_state_change<H>(mut self, hook: H) -> Self
    where
        H: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(hook));
        self
    }
}

/// Circuit breaker error.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the call was rejected without running the operation.
    Open,
    /// The operation ran and failed.
    Execution(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Circuit breaker is open"),
            Self::Execution(e) => write!(f, "Execution failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for CircuitBreakerError<E> {}

impl<E> CircuitBreakerError<E> {
    /// True when the call was rejected without running the operation.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Internal circuit breaker state.
struct Inner {
    state: CircuitState,
    opened_at: Option<Instant>,
    consecutive_failures: u32,
    probe_successes: u32,
    probes_admitted: u32,
}

/// Circuit breaker for protecting against cascade failures.
///
/// Counts *consecutive* qualifying failures while closed; reaching the
/// threshold opens the circuit. After `recovery_timeout` the breaker admits
/// a bounded number of trial calls (one by default) and closes again once
/// enough of them succeed.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
    total_calls: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            recovery_timeout = ?config.recovery_timeout,
            "Circuit breaker initialized"
        );

        Arc::new(Self {
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                opened_at: None,
                consecutive_failures: 0,
                probe_successes: 0,
                probes_admitted: 0,
            }),
            total_calls: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        })
    }

    /// Create with default configuration.
    pub fn default_circuit() -> Arc<Self> {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Get the circuit breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open();
        self.inner.read().state
    }

    /// Get the current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.read().consecutive_failures
    }

    /// Check whether a call would be admitted, consuming a trial slot in
    /// half-open state.
    pub fn is_allowed(&self) -> bool {
        self.maybe_transition_to_half_open();

        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.probes_admitted < self.config.half_open_probes {
                    inner.probes_admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// Any `Err` counts as a qualifying failure. Use [`call_with`] to
    /// classify which errors count against the threshold.
    ///
    /// [`call_with`]: CircuitBreaker::call_with
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(f, |_| true).await
    }

    /// Execute with a predicate deciding whether an error counts as a
    /// failure.
    ///
    /// Errors the predicate rejects are treated as successful outcomes for
    /// circuit accounting and still propagate as `Execution`.
    pub async fn call_with<F, Fut, T, E, P>(
        &self,
        f: F,
        is_failure: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if !self.is_allowed() {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(name = %self.config.name, "Circuit breaker rejected call");
            return Err(CircuitBreakerError::Open);
        }

        match f().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                if is_failure(&e) {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(CircuitBreakerError::Execution(e))
            }
        }
    }

    /// Record a successful outcome.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.probe_successes += 1;
                if inner.probe_successes >= self.config.success_threshold {
                    let transition = self.close(&mut inner);
                    drop(inner);
                    self.notify(transition);
                }
            }
            CircuitState::Open => {
                debug!(name = %self.config.name, "Success recorded while circuit open");
            }
        }
    }

    /// Record a failed outcome.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    let transition = self.open(&mut inner);
                    drop(inner);
                    self.notify(transition);
                }
            }
            CircuitState::HalfOpen => {
                // Any trial failure reopens the circuit
                let transition = self.open(&mut inner);
                drop(inner);
                self.notify(transition);
            }
            CircuitState::Open => {}
        }
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        let transition = self.close(&mut inner);
        drop(inner);
        self.notify(transition);
    }

    /// Manually force the circuit open.
    pub fn force_open(&self) {
        let mut inner = self.inner.write();
        let transition = self.open(&mut inner);
        drop(inner);
        self.notify(transition);
    }

    /// Open the circuit. Returns the transition for notification.
    fn open(&self, inner: &mut Inner) -> Option<(CircuitState, CircuitState)> {
        if inner.state == CircuitState::Open {
            inner.opened_at = Some(Instant::now());
            return None;
        }
        warn!(
            name = %self.config.name,
            failures = inner.consecutive_failures,
            "Circuit breaker OPENED"
        );
        let from = inner.state;
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_successes = 0;
        inner.probes_admitted = 0;
        Some((from, CircuitState::Open))
    }

    /// Close the circuit. Returns the transition for notification.
    fn close(&self, inner: &mut Inner) -> Option<(CircuitState, CircuitState)> {
        if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
            return None;
        }
        info!(name = %self.config.name, "Circuit breaker CLOSED");
        let from = inner.state;
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.consecutive_failures = 0;
        inner.probe_successes = 0;
        inner.probes_admitted = 0;
        Some((from, CircuitState::Closed))
    }

    /// Transition to half-open once the recovery timeout has elapsed.
    fn maybe_transition_to_half_open(&self) {
        {
            let inner = self.inner.read();
            if inner.state != CircuitState::Open {
                return;
            }
            match inner.opened_at {
                Some(opened_at) if opened_at.elapsed() >= self.config.recovery_timeout => {}
                _ => return,
            }
        }

        let transition = {
            let mut inner = self.inner.write();
            if inner.state != CircuitState::Open {
                None
            } else {
                debug!(name = %self.config.name, "Circuit breaker transitioning to HALF-OPEN");
                inner.state = CircuitState::HalfOpen;
                inner.probe_successes = 0;
                inner.probes_admitted = 0;
                Some((CircuitState::Open, CircuitState::HalfOpen))
            }
        };
        self.notify(transition);
    }

    /// Fire the state-change hook outside the state lock.
    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        if let Some((from, to)) = transition
            && let Some(hook) = &self.config.on_state_change
        {
            hook(from, to);
        }
    }

    // Metrics

    /// Get total calls processed.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Get total successful outcomes.
    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }

    /// Get total failed outcomes.
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Get total rejected calls (circuit open).
    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: self.config.name.clone(),
            state: self.state(),
            total_calls: self.total_calls(),
            total_successes: self.total_successes(),
            total_failures: self.total_failures(),
            total_rejections: self.total_rejections(),
            consecutive_failures: self.failure_count(),
        }
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Circuit breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Total calls.
    pub total_calls: u64,
    /// Total successes.
    pub total_successes: u64,
    /// Total failures.
    pub total_failures: u64,
    /// Total rejections.
    pub total_rejections: u64,
    /// Current consecutive-failure count.
    pub consecutive_failures: u32,
}

impl CircuitBreakerStats {
    /// Calculate success rate (0.0 - 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            1.0
        } else {
            self.total_successes as f64 / self.total_calls as f64
        }
    }

    /// Calculate failure rate (0.0 - 1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_calls as f64
        }
    }
}
