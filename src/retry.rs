//! Transient-call retrier with classification-dependent backoff.
//!
//! The policy is "always retry, vary the wait": transient server errors, rate
//! limits, quota exhaustion, transport failures and safety rejections all
//! retry with a fixed delay, with rate limiting waiting twice as long.
//! Exhausting the attempt ceiling yields `None` rather than an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;

/// Injectable sleep dependency so tests can simulate long retry runs without
/// real delay.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Bounds and delays for one retry loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempt ceiling; large enough to be effectively unbounded in practice.
    pub max_attempts: usize,
    /// Base delay between attempts.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            base_delay: Duration::from_secs(10),
        }
    }
}

/// Stateless retry executor; each [`run`](Retrier::run) call is independent.
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    /// Invoke `operation` until it produces a value or the ceiling is hit.
    ///
    /// The operation reports three shapes: `Ok(Some(v))` succeeds, `Ok(None)`
    /// is a soft failure (structurally fine, semantically insufficient) that
    /// retries after the base delay, and `Err(e)` retries after a delay scaled
    /// by the error's classification.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        for attempt in 1..=self.policy.max_attempts {
            let delay = match operation().await {
                Ok(Some(value)) => {
                    debug!(attempt, "call succeeded");
                    return Some(value);
                }
                Ok(None) => {
                    warn!(attempt, "call returned an insufficient result, retrying");
                    self.policy.base_delay
                }
                Err(err) => {
                    let class = err.class();
                    warn!(attempt, error = %err, ?class, "call failed, retrying");
                    self.policy.base_delay * class.backoff_multiplier()
                }
            };
            if attempt < self.policy.max_attempts {
                self.clock.sleep(delay).await;
            }
        }
        warn!(
            attempts = self.policy.max_attempts,
            "retry budget exhausted"
        );
        None
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::test_clock::RecordingClock;
    use super::*;
    use crate::error::StoryError;

    fn api_error(status: u16) -> StoryError {
        StoryError::Api {
            status,
            message: format!("status {status}"),
        }
    }

    fn retrier(max_attempts: usize, clock: Arc<RecordingClock>) -> Retrier {
        Retrier::new(
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_secs(10),
            },
            clock,
        )
    }

    #[tokio::test]
    async fn backoff_scales_with_classification() {
        let clock = Arc::new(RecordingClock::default());
        let retrier = retrier(10, clock.clone());
        let calls = AtomicUsize::new(0);

        let result = retrier
            .run(|| async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(api_error(429)),
                    1 => Err(api_error(500)),
                    _ => Ok(Some(42)),
                }
            })
            .await;

        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2x base after the 429, 1x base after the 500.
        let sleeps = clock.sleeps.lock().unwrap();
        assert_eq!(
            *sleeps,
            vec![Duration::from_secs(20), Duration::from_secs(10)]
        );
    }

    #[tokio::test]
    async fn soft_failures_retry_with_base_delay() {
        let clock = Arc::new(RecordingClock::default());
        let retrier = retrier(10, clock.clone());
        let calls = AtomicUsize::new(0);

        let result = retrier
            .run(|| async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Ok(None),
                    _ => Ok(Some("ok")),
                }
            })
            .await;

        assert_eq!(result, Some("ok"));
        let sleeps = clock.sleeps.lock().unwrap();
        assert_eq!(*sleeps, vec![Duration::from_secs(10)]);
    }

    #[tokio::test]
    async fn exhaustion_returns_none_not_error() {
        let clock = Arc::new(RecordingClock::default());
        let retrier = retrier(5, clock.clone());
        let calls = AtomicUsize::new(0);

        let result: Option<()> = retrier
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(api_error(503))
            })
            .await;

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // No sleep after the final attempt.
        assert_eq!(clock.sleeps.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn thousands_of_attempts_run_without_real_delay() {
        let clock = Arc::new(RecordingClock::default());
        let retrier = retrier(2000, clock.clone());

        let result: Option<()> = retrier.run(|| async { Ok(None) }).await;

        assert_eq!(result, None);
        assert_eq!(clock.sleeps.lock().unwrap().len(), 1999);
    }
}
