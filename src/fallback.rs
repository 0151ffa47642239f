//! Fallback pattern for graceful degradation.
//!
//! A fallback substitutes alternative behavior when the primary operation
//! fails. The recovery handler receives the caught error; success results
//! pass through unmodified.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stanchion::Fallback;
//!
//! let fallback = Fallback::new(|_err| async {
//!     // Return cached/default value
//!     Ok(CachedData::default())
//! });
//!
//! let result = fallback.call(|| async {
//!     external_service.fetch().await
//! }).await;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Type alias for an async recovery handler receiving the caught error.
pub type FallbackFn<T, E> =
    Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send>> + Send + Sync>;

/// Type alias for a nullary handler in a [`FallbackChain`].
pub type ChainFn<T, E> =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<T, E>> + Send>> + Send + Sync>;

/// Fallback handler that provides alternative behavior on failure.
pub struct Fallback<T, E> {
    handler: FallbackFn<T, E>,
    name: String,
}

impl<T, E> Fallback<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create a new fallback from a recovery handler.
    ///
    /// The handler receives the error the primary operation failed with.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |e| Box::pin(handler(e))),
            name: "default".to_string(),
        }
    }

    /// Set the fallback name for logging.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Execute the primary operation, recovering on failure.
    pub async fn call<F, Fut>(&self, primary: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match primary().await {
            Ok(result) => Ok(result),
            Err(e) => {
                debug!(name = %self.name, "Primary operation failed, using fallback");
                (self.handler)(e).await
            }
        }
    }

    /// Execute with recovery only for errors matching the predicate.
    pub async fn call_if<F, Fut, P>(&self, primary: F, should_fallback: P) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        match primary().await {
            Ok(result) => Ok(result),
            Err(e) => {
                if should_fallback(&e) {
                    debug!(name = %self.name, "Primary operation failed, using fallback");
                    (self.handler)(e).await
                } else {
                    Err(e)
                }
            }
        }
    }
}

impl<T, E> Clone for Fallback<T, E> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            name: self.name.clone(),
        }
    }
}

/// Create a fallback that substitutes a constant value.
pub fn fallback_value<T, E>(value: T) -> Fallback<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    Fallback::new(move |_| {
        let v = value.clone();
        async move { Ok(v) }
    })
}

/// Create a fallback that substitutes the type's default value.
pub fn fallback_default<T, E>() -> Fallback<T, E>
where
    T: Default + Send + 'static,
    E: Send + 'static,
{
    Fallback::new(|_| async { Ok(T::default()) })
}

/// Chain of alternatives tried in order until one succeeds.
pub struct FallbackChain<T, E> {
    handlers: Vec<ChainFn<T, E>>,
}

impl<T, E> FallbackChain<T, E>
where
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    /// Create a new fallback chain.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.handlers.push(Arc::new(move || Box::pin(handler())));
        self
    }

    /// Execute the chain, trying each handler until one succeeds.
    pub async fn call(&self) -> Result<T, E> {
        let mut last_error: Option<E> = None;

        for (i, handler) in self.handlers.iter().enumerate() {
            match handler().await {
                Ok(result) => {
                    if i > 0 {
                        debug!(handler = i, "Fallback chain succeeded on handler");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    debug!(handler = i, error = %e, "Fallback chain handler failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.expect("Fallback chain must have at least one handler"))
    }
}

impl<T, E> Default for FallbackChain<T, E>
where
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
