use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::SyncResult;

/// Retry an async operation with exponential backoff.
///
/// The operation is invoked at most `max_attempts` times. After a failed
/// attempt `n` (1-indexed) the loop sleeps `base_delay * 2^(n-1)` before
/// the next call, so with the defaults of 3 attempts and a 1s base delay
/// the waits are 1s then 2s. No jitter is applied here; callers that fan
/// out widely can compose [`with_jitter`] via [`retry_with_strategy`].
///
/// Once started the loop runs to success or exhaustion; there is no
/// cancellation point other than dropping the future.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_attempts: usize,
    base_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_with_strategy(
        &mut operation,
        max_attempts,
        exponential_backoff(base_delay.as_millis() as u64, None),
        "operation",
    )
    .await
}

/// Retry with an arbitrary backoff strategy mapping the 1-indexed failed
/// attempt number to a delay.
pub async fn retry_with_strategy<T, E, F, Fut, B>(
    operation: &mut F,
    max_attempts: usize,
    backoff: B,
    log_context: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    B: Fn(usize) -> Duration,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", log_context, attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    error!("{} failed after {} attempts: {}", log_context, attempt, e);
                    return Err(e);
                }

                let delay = backoff(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    log_context, attempt, max_attempts, e, delay
                );
                sleep(delay).await;
            }
        }
    }
}

/// Retry an operation only while its error category is retryable.
///
/// Non-retryable failures (validation, config, host-surface errors)
/// return immediately; retryable ones back off exponentially like
/// [`retry_with_backoff`].
pub async fn retry_on_retryable<T, F, Fut>(
    mut operation: F,
    max_attempts: usize,
    base_delay: Duration,
    log_context: &str,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let backoff = exponential_backoff(base_delay.as_millis() as u64, None);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", log_context, attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if !e.category.is_retryable() || attempt >= max_attempts {
                    if attempt > 1 {
                        error!("{} failed after {} attempts: {}", log_context, attempt, e);
                    }
                    return Err(e);
                }

                let delay = backoff(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    log_context, attempt, max_attempts, e, delay
                );
                sleep(delay).await;
            }
        }
    }
}

/// Helper to create a constant backoff duration
pub fn constant_backoff(duration_ms: u64) -> impl Fn(usize) -> Duration {
    move |_| Duration::from_millis(duration_ms)
}

/// Helper to create a linear backoff strategy: base * attempt
pub fn linear_backoff(base_ms: u64) -> impl Fn(usize) -> Duration {
    move |attempt| Duration::from_millis(base_ms * attempt as u64)
}

/// Helper to create an exponential backoff strategy: base * 2^(attempt-1)
/// with an optional maximum delay
pub fn exponential_backoff(base_ms: u64, max_ms: Option<u64>) -> impl Fn(usize) -> Duration {
    move |attempt| {
        let delay = base_ms.saturating_mul(2u64.saturating_pow((attempt - 1) as u32));
        match max_ms {
            Some(max) => Duration::from_millis(delay.min(max)),
            None => Duration::from_millis(delay),
        }
    }
}

/// Helper to add up to 25% jitter to any backoff function, spreading out
/// simultaneous retries from multiple engine instances
pub fn with_jitter<F>(backoff: F) -> impl Fn(usize) -> Duration
where
    F: Fn(usize) -> Duration,
{
    move |attempt| {
        let delay = backoff(attempt);
        let jitter_ms = (delay.as_millis() as f64 * fastrand::f64() * 0.25) as u64;
        delay + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{database_failed, validation_failed};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_with_cumulative_backoff() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let started = Instant::now();

        let result = retry_with_backoff(
            move || {
                let counter = counter_clone.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt < 3 {
                        Err(format!("failed attempt {}", attempt))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            3,
            Duration::from_millis(1000),
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        // 1000ms after the first failure, 2000ms after the second.
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_and_returns_last_error() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), String> = retry_with_backoff(
            move || {
                let counter = counter_clone.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("failed attempt {}", attempt))
                }
            },
            3,
            Duration::from_millis(10),
        )
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err(), "failed attempt 3");
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_categories_are_retried() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = retry_on_retryable(
            move || {
                let counter = counter_clone.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt < 2 {
                        Err(database_failed("bookmarks", "transient"))
                    } else {
                        Ok("done")
                    }
                }
            },
            3,
            Duration::from_millis(10),
            "bookmarks.list",
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_fail_fast() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result: SyncResult<()> = retry_on_retryable(
            move || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(validation_failed("Enter a URL"))
                }
            },
            5,
            Duration::from_millis(10),
            "bookmarks.save",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_strategies() {
        let constant = constant_backoff(100);
        assert_eq!(constant(1), Duration::from_millis(100));
        assert_eq!(constant(5), Duration::from_millis(100));

        let linear = linear_backoff(50);
        assert_eq!(linear(1), Duration::from_millis(50));
        assert_eq!(linear(3), Duration::from_millis(150));

        let exp = exponential_backoff(1000, None);
        assert_eq!(exp(1), Duration::from_millis(1000));
        assert_eq!(exp(2), Duration::from_millis(2000));
        assert_eq!(exp(3), Duration::from_millis(4000));

        let capped = exponential_backoff(1000, Some(3000));
        assert_eq!(capped(3), Duration::from_millis(3000));

        let jittered = with_jitter(constant_backoff(100));
        let d = jittered(1);
        assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(125));
    }
}
