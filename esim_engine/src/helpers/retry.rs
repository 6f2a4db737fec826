use std::{future::Future, time::Duration};

use log::*;
use tokio_util::sync::CancellationToken;

/// Returned by [`retry_with_backoff`] when the cancellation token fires while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Exponential backoff. The delay before attempt `n + 1` is `initial_delay * multiplier^(n-1)`, capped at
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// 3 attempts, 1s then 2s apart (the next step would be 4s).
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self { max_attempts, initial_delay: Duration::ZERO, multiplier: 1, max_delay: Duration::ZERO }
    }

    /// Delay after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or `policy.max_attempts` is reached. Waiting
/// between attempts stops early if `cancel` fires.
pub async fn retry_with_backoff<T, E, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + From<Cancelled>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let delay = policy.delay_after(attempt);
                warn!("🔁️ {name} failed (attempt {attempt}/{}): {e}. Retrying in {delay:?}", policy.max_attempts);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(E::from(Cancelled)),
                    _ = tokio::time::sleep(delay) => {},
                }
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky,
        Fatal,
        Cancelled,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl From<Cancelled> for TestError {
        fn from(_: Cancelled) -> Self {
            TestError::Cancelled
        }
    }

    #[test]
    fn backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_with_backoff(
            "test",
            &RetryPolicy::no_delay(3),
            &CancellationToken::new(),
            |e| *e == TestError::Flaky,
            || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError::Flaky)
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> =
            retry_with_backoff("test", &RetryPolicy::no_delay(3), &CancellationToken::new(), |_| true, || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Flaky)
                }
            })
            .await;
        assert_eq!(result, Err(TestError::Flaky));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let c = calls.clone();
        let result: Result<(), _> = retry_with_backoff(
            "test",
            &RetryPolicy::no_delay(3),
            &CancellationToken::new(),
            |e| *e == TestError::Flaky,
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                }
            },
        )
        .await;
        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        token.cancel();
        let policy = RetryPolicy { initial_delay: Duration::from_secs(60), ..RetryPolicy::default() };
        let result: Result<(), _> =
            retry_with_backoff("test", &policy, &token, |_| true, || async { Err(TestError::Flaky) }).await;
        assert_eq!(result, Err(TestError::Cancelled));
    }
}
