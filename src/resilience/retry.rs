//! Exponential/constant backoff retry, following spec.md §4.3.
//!
//! Grounded on the teacher's `llm/retry.rs` `RetryExecutor::chat`: loop up to
//! `max_attempts`, sleep `policy.backoff.delay(attempt)` between tries,
//! classify whether the failure warrants another attempt before retrying.

use std::future::Future;
use std::time::Duration;

/// Backoff shape for delay-before-attempt-k (1-indexed).
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    Constant,
    Exponential,
}

impl Backoff {
    /// Delay before the k-th retry attempt (`attempt` is 1-indexed: the
    /// delay before the *first* retry, i.e. the second call to `op`).
    pub fn delay(self, attempt: u32, initial: Duration, max: Duration) -> Duration {
        match self {
            Backoff::Constant => initial.min(max),
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// An error type that can classify itself as explicitly retryable or fatal.
/// `tagged_retryable` returning `None` falls back to message-pattern
/// matching against spec.md's patterns (`timeout`, `rate limit`, `429`,
/// `503`, `ECONNRESET`, `EAI_AGAIN`, `network`, case-insensitive).
pub trait RetryClassifiable: std::fmt::Display {
    fn tagged_retryable(&self) -> Option<bool> {
        None
    }
}

const RETRYABLE_PATTERNS: [&str; 7] = [
    "timeout",
    "rate limit",
    "429",
    "503",
    "econnreset",
    "eai_again",
    "network",
];

pub fn is_retryable<E: RetryClassifiable>(error: &E) -> bool {
    if let Some(tagged) = error.tagged_retryable() {
        return tagged;
    }
    let message = error.to_string().to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|pattern| message.contains(pattern))
}

/// Retry policy: `{maxRetries, backoff, initialDelay, maxDelay}` from
/// spec.md §4.3. `onRetry` is invoked after each retryable failure, before
/// the delay.
pub struct RetryPolicy<E> {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub on_retry: Option<Box<dyn Fn(&E, u32) + Send + Sync>>,
}

impl<E> RetryPolicy<E> {
    pub fn new(max_retries: u32, backoff: Backoff, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            initial_delay,
            max_delay,
            on_retry: None,
        }
    }

    pub fn with_on_retry(mut self, callback: impl Fn(&E, u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(callback));
        self
    }
}

/// Executes a fallible async operation under a [`RetryPolicy`].
pub struct RetryStrategy;

impl RetryStrategy {
    /// Run `op` up to `policy.max_retries + 1` times. Rethrows immediately
    /// on a non-retryable classification.
    pub async fn execute<T, E, F, Fut>(op: F, policy: &RetryPolicy<E>) -> Result<T, E>
    where
        E: RetryClassifiable,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= policy.max_retries || !is_retryable(&error) {
                        return Err(error);
                    }
                    attempt += 1;
                    if let Some(on_retry) = &policy.on_retry {
                        on_retry(&error, attempt);
                    }
                    let delay = policy.backoff.delay(attempt, policy.initial_delay, policy.max_delay);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        message: String,
        tagged: Option<bool>,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.message)
        }
    }

    impl RetryClassifiable for TestError {
        fn tagged_retryable(&self) -> Option<bool> {
            self.tagged
        }
    }

    fn message_error(message: &str) -> TestError {
        TestError {
            message: message.to_string(),
            tagged: None,
        }
    }

    #[tokio::test]
    async fn succeeds_on_second_attempt_after_retryable_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Backoff::Constant, Duration::from_millis(1), Duration::from_millis(5));

        let result = RetryStrategy::execute(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(message_error("connection timeout"))
                } else {
                    Ok::<_, TestError>(42)
                }
            },
            &policy,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_is_rethrown_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Backoff::Constant, Duration::from_millis(1), Duration::from_millis(5));

        let result = RetryStrategy::execute(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(message_error("invalid scenario"))
            },
            &policy,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_max_retries_then_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Backoff::Constant, Duration::from_millis(1), Duration::from_millis(5));

        let result = RetryStrategy::execute(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(message_error("503 service unavailable"))
            },
            &policy,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn explicit_tag_overrides_message_pattern() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Backoff::Constant, Duration::from_millis(1), Duration::from_millis(5));

        let error = TestError {
            message: "timeout but explicitly fatal".to_string(),
            tagged: Some(false),
        };

        let result = RetryStrategy::execute(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                let error = TestError {
                    message: error.message.clone(),
                    tagged: error.tagged,
                };
                async move { Err::<(), _>(error) }
            },
            &policy,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exponential_backoff_doubles_and_caps_at_max() {
        let max = Duration::from_millis(100);
        let initial = Duration::from_millis(10);
        assert_eq!(Backoff::Exponential.delay(1, initial, max), Duration::from_millis(10));
        assert_eq!(Backoff::Exponential.delay(2, initial, max), Duration::from_millis(20));
        assert_eq!(Backoff::Exponential.delay(3, initial, max), Duration::from_millis(40));
        assert_eq!(Backoff::Exponential.delay(10, initial, max), max);
    }

    #[test]
    fn constant_backoff_ignores_attempt_number() {
        let initial = Duration::from_millis(25);
        let max = Duration::from_millis(100);
        assert_eq!(Backoff::Constant.delay(1, initial, max), initial);
        assert_eq!(Backoff::Constant.delay(9, initial, max), initial);
    }
}
