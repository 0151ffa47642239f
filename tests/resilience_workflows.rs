//! Integration tests for common resilience workflows.
//!
//! These tests exercise the primitives the way applications combine them:
//! breakers guarding flaky dependencies, retries with real backoff
//! schedules, saturated bulkheads, and full compositions.

use stanchion::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// =============================================================================
// Circuit Breaker Workflows
// =============================================================================

#[tokio::test]
async fn breaker_opens_exactly_at_threshold() {
    let cb = CircuitBreaker::new(CircuitBreakerConfig::new("threshold").failure_threshold(3));

    for i in 1..=2 {
        let _: Result<(), _> = cb.call(|| async { Err::<(), _>("down") }).await;
        assert_eq!(cb.state(), CircuitState::Closed, "closed after failure {i}");
    }

    let _: Result<(), _> = cb.call(|| async { Err::<(), _>("down") }).await;
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test]
async fn open_breaker_never_invokes_the_operation() {
    let cb = CircuitBreaker::new(
        CircuitBreakerConfig::new("gate")
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(3600)),
    );

    let _: Result<(), _> = cb.call(|| async { Err::<(), _>("down") }).await;

    let invocations = AtomicU32::new(0);
    for _ in 0..5 {
        let result: Result<(), CircuitBreakerError<&str>> = cb
            .call(|| {
                invocations.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(cb.total_rejections(), 5);
}

#[tokio::test]
async fn breaker_recovers_through_half_open() {
    let cb = CircuitBreaker::new(
        CircuitBreakerConfig::new("recovery")
            .failure_threshold(1)
            .recovery_timeout(Duration::from_millis(100)),
    );

    // First failing call opens it
    let _: Result<(), _> = cb.call(|| async { Err::<(), _>("down") }).await;
    assert_eq!(cb.state(), CircuitState::Open);

    // A successful call after the recovery timeout closes it again
    tokio::time::sleep(Duration::from_millis(150)).await;
    let result: Result<i32, CircuitBreakerError<&str>> = cb.call(|| async { Ok(1) }).await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.failure_count(), 0);
}

// =============================================================================
// Retry Workflows
// =============================================================================

#[tokio::test]
async fn retry_returns_success_after_transient_failures() {
    let calls = AtomicU32::new(0);

    let result: Result<&str, RetryError<&str>> = retry(
        RetryConfig::new(3).backoff(BackoffStrategy::constant(Duration::from_millis(1))),
        || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err("transient")
                } else {
                    Ok("recovered")
                }
            }
        },
    )
    .await;

    assert_eq!(result.unwrap(), "recovered");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_follows_the_exponential_schedule() {
    let started = tokio::time::Instant::now();
    let mut offsets = Vec::new();

    let _: Result<(), RetryError<&str>> = retry(
        RetryConfig::new(3).backoff(BackoffStrategy::exponential(Duration::from_millis(100))),
        || {
            offsets.push(started.elapsed());
            async { Err("down") }
        },
    )
    .await;

    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_millis(100),
            Duration::from_millis(300),
        ]
    );
}

// =============================================================================
// Rate Limiter Workflows
// =============================================================================

#[tokio::test(start_paused = true)]
async fn limiter_admits_burst_then_recovers() {
    let limiter = RateLimiter::new(RateLimiterConfig::new(2, Duration::from_secs(1)));

    assert!(limiter.try_acquire());
    assert!(limiter.try_acquire());
    assert!(!limiter.try_acquire());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(limiter.try_acquire());
}

#[tokio::test(start_paused = true)]
async fn queued_limiter_preserves_arrival_order() {
    let limiter = RateLimiter::new(
        RateLimiterConfig::new(1, Duration::from_millis(20)).queue_excess(true),
    );
    assert!(limiter.try_acquire());

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let mut waiters = Vec::new();
    for i in 0..4 {
        let limiter = Arc::clone(&limiter);
        let order = Arc::clone(&order);
        waiters.push(tokio::spawn(async move {
            limiter.acquire().await.unwrap();
            order.lock().push(i);
        }));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    for waiter in waiters {
        waiter.await.unwrap();
    }
    assert_eq!(order.lock().as_slice(), &[0, 1, 2, 3]);
}

// =============================================================================
// Bulkhead Workflows
// =============================================================================

#[tokio::test]
async fn bulkhead_runs_two_queues_one_rejects_fourth() {
    let bulkhead = Bulkhead::new(BulkheadConfig::new("partition", 2).max_queue(1));
    let (gate_tx, gate_rx) = tokio::sync::watch::channel(false);

    let mut running = Vec::new();
    for _ in 0..2 {
        let bulkhead = Arc::clone(&bulkhead);
        let mut gate = gate_rx.clone();
        running.push(tokio::spawn(async move {
            bulkhead
                .call(|| async move {
                    let _ = gate.wait_for(|open| *open).await;
                    Ok::<_, &str>(())
                })
                .await
        }));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bulkhead.running(), 2);

    let queued = {
        let bulkhead = Arc::clone(&bulkhead);
        let mut gate = gate_rx.clone();
        tokio::spawn(async move {
            bulkhead
                .call(|| async move {
                    let _ = gate.wait_for(|open| *open).await;
                    Ok::<_, &str>(())
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bulkhead.queue_len(), 1);

    let rejected: Result<(), BulkheadError<&str>> = bulkhead.call(|| async { Ok(()) }).await;
    assert!(matches!(rejected, Err(BulkheadError::Full)));

    let _ = gate_tx.send(true);
    for task in running {
        task.await.unwrap().unwrap();
    }
    queued.await.unwrap().unwrap();

    assert_eq!(bulkhead.running(), 0);
    assert_eq!(bulkhead.queue_len(), 0);
}

// =============================================================================
// Timeout and Fallback Workflows
// =============================================================================

#[tokio::test(start_paused = true)]
async fn timeout_rejects_unsettled_operation() {
    let result: Result<i32, TimeoutError<&str>> =
        with_timeout_result(Duration::from_millis(100), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;

    assert!(matches!(
        result,
        Err(TimeoutError::Elapsed(d)) if d == Duration::from_millis(100)
    ));
}

#[tokio::test]
async fn fallback_substitutes_only_on_failure() {
    let fallback = fallback_value::<&str, &str>("cached");

    let substituted = fallback.call(|| async { Err("down") }).await;
    assert_eq!(substituted.unwrap(), "cached");

    for _ in 0..2 {
        let passed = fallback.call(|| async { Ok("live") }).await;
        assert_eq!(passed.unwrap(), "live");
    }
}

// =============================================================================
// Hedge Workflows
// =============================================================================

#[tokio::test(start_paused = true)]
async fn hedge_takes_the_fastest_success() {
    let launches = Arc::new(AtomicU32::new(0));

    let result: Result<&str, HedgeError<&str>> =
        hedge(3, Duration::from_millis(30), || {
            let launch = launches.fetch_add(1, Ordering::SeqCst);
            async move {
                // The primary stalls; the first hedge answers
                let delay = if launch == 0 { 10_000 } else { 10 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok("replica")
            }
        })
        .await;

    assert_eq!(result.unwrap(), "replica");
    assert_eq!(launches.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Composition Workflows
// =============================================================================

#[tokio::test]
async fn breaker_counts_retry_exhaustion_once() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("pinning").failure_threshold(3));
    let attempts = AtomicU32::new(0);

    let resilient: Resilient<(), &str> = Resilient::new("pinning")
        .retry(RetryConfig::new(4).backoff(BackoffStrategy::None))
        .circuit_breaker(Arc::clone(&breaker));

    let result = resilient
        .call(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("down") }
        })
        .await;

    // Four attempts inside the breaker produced exactly one recorded failure
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(breaker.failure_count(), 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(matches!(
        result,
        Err(ResilienceError::RetryExhausted { attempts: 4, .. })
    ));
}

#[tokio::test]
async fn composition_recovers_through_fallback() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("storefront").failure_threshold(1));
    breaker.force_open();

    let resilient: Resilient<&str, &str> = Resilient::new("storefront")
        .circuit_breaker(breaker)
        .fallback(|error| async move {
            match error {
                ResilienceError::CircuitOpen => Ok("cached catalog"),
                other => Err(other),
            }
        });

    let result = resilient.call(|| async { Ok("live catalog") }).await;
    assert_eq!(result.unwrap(), "cached catalog");
}

#[tokio::test(start_paused = true)]
async fn full_stack_composition_succeeds() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("full"));
    let limiter = RateLimiter::new(RateLimiterConfig::new(10, Duration::from_secs(1)));
    let bulkhead = Bulkhead::new(BulkheadConfig::new("full", 2));

    let resilient: Resilient<i32, &str> = Resilient::new("full")
        .timeout(Duration::from_millis(500))
        .retry(RetryConfig::new(3).backoff(BackoffStrategy::constant(Duration::from_millis(10))))
        .circuit_breaker(Arc::clone(&breaker))
        .rate_limit(Arc::clone(&limiter))
        .bulkhead(Arc::clone(&bulkhead))
        .fallback_value(-1);

    let flaky = AtomicU32::new(0);
    let result = resilient
        .call(|| {
            let call = flaky.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err("cold start")
                } else {
                    Ok(7)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 7);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(bulkhead.running(), 0);
    assert!(limiter.available_tokens() < 10.0);
}
