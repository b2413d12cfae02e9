//! Exponential backoff used by every network-facing loop.
//!
//! Delays start at one second and double after each failure up to a cap.
//! There is no attempt limit: an operation is retried until it succeeds, it
//! fails with a non-transient error, or the shutdown token fires.

use backon::{BackoffBuilder, Retryable};
use std::{fmt::Display, future::Future, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default cap on the delay between attempts (4 hours).
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(4 * 60 * 60);

/// Delay before the first retry.
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Errors that know whether retrying them can help.
pub trait Transient {
    /// `false` for errors that will fail the same way on every attempt.
    fn is_transient(&self) -> bool;
}

/// Doubling backoff, capped, never exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    initial: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Policy starting at one second and capped at `max_delay`.
    pub const fn new(max_delay: Duration) -> Self {
        Self { initial: INITIAL_RETRY_DELAY, max_delay }
    }

    /// Override the first delay.
    pub const fn with_initial_delay(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    /// Cap on the delay between attempts.
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay after the `attempt`-th consecutive failure (0-based):
    /// `min(initial * 2^attempt, max_delay)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl BackoffBuilder for RetryPolicy {
    type Backoff = RetryDelays;

    fn build(self) -> Self::Backoff {
        RetryDelays { policy: self, attempt: 0 }
    }
}

/// Endless iterator over a [`RetryPolicy`]'s delays.
#[derive(Debug, Clone)]
pub struct RetryDelays {
    policy: RetryPolicy,
    attempt: u32,
}

impl Iterator for RetryDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }
}

/// Run `op` until it succeeds.
///
/// Transient failures are logged and retried after the policy's delay.
/// Returns `Ok(None)` if `shutdown` fires first and `Err` for the first
/// non-transient failure.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    shutdown: &CancellationToken,
    what: &'static str,
    op: F,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let attempt = op
        .retry(policy)
        .sleep(tokio::time::sleep)
        .when(|err: &E| err.is_transient())
        .notify(|err: &E, delay: Duration| {
            warn!(target: "quai::retry", %err, retry_in = ?delay, "{what} failed");
        });

    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Ok(None),
        res = attempt => res.map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(if self.0 { "transient" } else { "fatal" })
        }
    }

    impl Transient for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn default_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = policy.build().take(5).map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert_eq!(policy.delay(13), Duration::from_secs(8192));
        assert_eq!(policy.delay(14), DEFAULT_MAX_RETRY_DELAY);
        assert_eq!(policy.delay(u32::MAX), DEFAULT_MAX_RETRY_DELAY);
    }

    proptest! {
        #[test]
        fn delay_is_capped_power_of_two(attempt in 0u32..200, cap_secs in 1u64..100_000) {
            let cap = Duration::from_secs(cap_secs);
            let delay = RetryPolicy::new(cap).delay(attempt);
            prop_assert!(delay <= cap);
            if attempt < 32 {
                let expected = Duration::from_secs(1u64 << attempt).min(cap);
                prop_assert_eq!(delay, expected);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_doubling_delay() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let calls_ref = &calls;
        let res = retry(RetryPolicy::default(), &CancellationToken::new(), "test", move || async move {
            if calls_ref.fetch_add(1, Ordering::SeqCst) < 3 { Err(Flaky(true)) } else { Ok(7) }
        })
        .await;

        assert_eq!(res.unwrap(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(1 + 2 + 4));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let res: Result<Option<()>, _> =
            retry(RetryPolicy::default(), &CancellationToken::new(), "test", move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err(Flaky(false))
            })
            .await;

        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_retrying() {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });

        let res: Result<Option<()>, Flaky> =
            retry(RetryPolicy::default(), &shutdown, "test", || async { Err(Flaky(true)) }).await;
        assert!(matches!(res, Ok(None)));
    }
}
