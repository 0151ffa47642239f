//! # Stanchion
//!
//! Resilience patterns for async Rust. Each primitive wraps an arbitrary
//! async operation; primitives share no state and compose by nesting, or
//! through [`Resilient`], which applies them in a fixed, documented order.
//!
//! ## Patterns
//!
//! - **Circuit Breaker**: stop calling a failing dependency, probe for recovery
//! - **Retry**: sequential re-invocation with configurable backoff
//! - **Rate Limiter**: token-bucket admission control with optional queueing
//! - **Bulkhead**: bounded concurrency with a bounded FIFO wait queue
//! - **Timeout**: race an operation against a deadline
//! - **Fallback**: graceful degradation when operations fail
//! - **Hedge**: staggered redundant attempts, first success wins
//! - **Health Check**: never-failing probe built from the timeout primitive
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stanchion::{CircuitBreaker, CircuitBreakerConfig, Resilient, RetryConfig};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     recovery_timeout: Duration::from_secs(30),
//!     ..Default::default()
//! });
//!
//! let catalog = Resilient::new("catalog")
//!     .timeout(Duration::from_secs(2))
//!     .retry(RetryConfig::new(3))
//!     .circuit_breaker(breaker);
//!
//! let result = catalog.call(|| async {
//!     Ok::<_, std::io::Error>("inventory")
//! }).await;
//! # let _ = result;
//! # }
//! ```
//!
//! ## Ownership
//!
//! Stateful components ([`CircuitBreaker`], [`RateLimiter`], [`Bulkhead`])
//! are constructed behind an [`Arc`](std::sync::Arc) and typically live as
//! a process-wide handle per protected resource. Stateless executors
//! ([`Retry`], [`Timeout`], [`Hedge`], [`Fallback`]) are cheap to clone and
//! carry only configuration.

mod bulkhead;
mod circuit_breaker;
mod fallback;
mod health;
mod hedge;
mod rate_limit;
mod resilient;
mod retry;
mod timeout;

pub use bulkhead::{
    Bulkhead, BulkheadConfig, BulkheadError, BulkheadPermit, BulkheadRejection, BulkheadStats,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState,
    StateChangeHook,
};
pub use fallback::{fallback_default, fallback_value, ChainFn, Fallback, FallbackChain, FallbackFn};
pub use health::{HealthCheck, HealthReport, ProbeFn};
pub use hedge::{hedge, Hedge, HedgeConfig, HedgeError};
pub use rate_limit::{
    RateLimitError, RateLimitExceeded, RateLimiter, RateLimiterConfig, RateLimiterStats,
};
pub use resilient::{RecoveryFn, Resilient, ResilienceError};
pub use retry::{retry, BackoffStrategy, Retry, RetryConfig, RetryError, RetryHook};
pub use timeout::{with_timeout, with_timeout_result, Timeout, TimeoutConfig, TimeoutError};

/// Prelude for common imports.
///
/// ```
/// use stanchion::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bulkhead::{Bulkhead, BulkheadConfig, BulkheadError};
    pub use crate::circuit_breaker::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    };
    pub use crate::fallback::{fallback_default, fallback_value, Fallback, FallbackChain};
    pub use crate::health::{HealthCheck, HealthReport};
    pub use crate::hedge::{Hedge, HedgeConfig, HedgeError};
    pub use crate::rate_limit::{RateLimitError, RateLimitExceeded, RateLimiter, RateLimiterConfig};
    pub use crate::resilient::{Resilient, ResilienceError};
    pub use crate::retry::{BackoffStrategy, Retry, RetryConfig, RetryError};
    pub use crate::timeout::{with_timeout, with_timeout_result, Timeout, TimeoutError};
}
