//! One poll-until-terminal shape for every backend
//!
//! The three backend families finish work differently: OpenStack-style
//! servers are polled for a ready status, vSphere-style calls hand back
//! a task to poll, and playbook runs end when the process exits. All of
//! them reduce to probing an [`Outcome`] until it leaves `Pending`,
//! which is what [`await_outcome`] does. Retry policy for whole
//! operations lives in [`retry_transient`] so it is written once, not
//! per backend.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AdapterError, Result};

/// Observation of an in-flight backend operation
#[derive(Debug)]
pub enum Outcome<T> {
    /// The operation has not reached a terminal state yet
    Pending,
    /// The operation finished successfully
    Ready(T),
    /// The backend reported a definitive failure
    Failed(AdapterError),
}

/// Bounded exponential backoff schedule
///
/// Delay for attempt `n` is `initial * 2^n`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Delay before the first retry
    pub initial: Duration,
    /// Upper bound on any single delay
    pub max: Duration,
}

impl Backoff {
    /// Create a backoff schedule
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay to sleep before retry number `attempt` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
        }
    }
}

/// Poll `probe` until the operation leaves `Pending`
///
/// Returns the payload on `Ready`, the reported error on `Failed`, and
/// [`AdapterError::StillPending`] if `deadline` expires while the
/// operation is still in flight. A pending timeout is NOT a failure:
/// the backend may still finish the work, so the caller must reconcile
/// before trusting the resource.
///
/// Transient probe errors are tolerated and count against the same
/// deadline; any other probe error aborts the wait.
pub async fn await_outcome<T, F, Fut>(
    mut probe: F,
    backoff: Backoff,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Outcome<T>>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }

        match probe().await {
            Ok(Outcome::Ready(value)) => return Ok(value),
            Ok(Outcome::Failed(err)) => return Err(err),
            Ok(Outcome::Pending) => {}
            Err(err) if err.is_retryable() => {
                warn!("probe failed, retrying: {}", err);
            }
            Err(err) => return Err(err),
        }

        let delay = backoff.delay(attempt);
        attempt = attempt.saturating_add(1);

        if start.elapsed() + delay >= deadline {
            debug!("deadline {:?} reached while pending", deadline);
            return Err(AdapterError::StillPending(deadline));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Run `op`, retrying transient failures up to `max_attempts` total tries
///
/// Permanent, indeterminate, and pending errors are returned on the
/// first occurrence; only [`AdapterError::Transient`] is retried.
pub async fn retry_transient<T, F, Fut>(
    mut op: F,
    backoff: Backoff,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let delay = backoff.delay(attempt);
                warn!(
                    "attempt {}/{} failed ({}), retrying in {:?}",
                    attempt + 1,
                    max_attempts,
                    err,
                    delay
                );
                attempt += 1;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(b.delay(0), Duration::from_millis(100));
        assert_eq!(b.delay(1), Duration::from_millis(200));
        assert_eq!(b.delay(2), Duration::from_millis(400));
        assert_eq!(b.delay(3), Duration::from_millis(800));
        assert_eq!(b.delay(4), Duration::from_secs(1));
        assert_eq!(b.delay(30), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_ready_after_pending_polls() {
        let polls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = await_outcome(
            || {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Ok(Outcome::Pending)
                    } else {
                        Ok(Outcome::Ready("done"))
                    }
                }
            },
            fast(),
            Duration::from_secs(5),
            &cancel,
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failed_outcome_surfaces_error() {
        let cancel = CancellationToken::new();

        let result: Result<()> = await_outcome(
            || async { Ok(Outcome::Failed(AdapterError::quota("cores exhausted"))) },
            fast(),
            Duration::from_secs(5),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(AdapterError::QuotaExceeded(_))));
    }

    #[tokio::test]
    async fn test_deadline_while_pending_is_still_pending() {
        let cancel = CancellationToken::new();

        let result: Result<()> = await_outcome(
            || async { Ok(Outcome::Pending) },
            fast(),
            Duration::from_millis(20),
            &cancel,
        )
        .await;

        match result {
            Err(AdapterError::StillPending(d)) => assert_eq!(d, Duration::from_millis(20)),
            other => panic!("expected StillPending, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });

        let result: Result<()> = await_outcome(
            || async { Ok(Outcome::Pending) },
            Backoff::new(Duration::from_millis(50), Duration::from_millis(50)),
            Duration::from_secs(30),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(AdapterError::Cancelled)));
    }

    #[tokio::test]
    async fn test_transient_probe_errors_are_tolerated() {
        let polls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = await_outcome(
            || {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(AdapterError::transient("connection reset"))
                    } else {
                        Ok(Outcome::Ready(42))
                    }
                }
            },
            fast(),
            Duration::from_secs(5),
            &cancel,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_permanent_probe_error_aborts_wait() {
        let cancel = CancellationToken::new();

        let result: Result<()> = await_outcome(
            || async { Err(AdapterError::auth("token expired")) },
            fast(),
            Duration::from_secs(5),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(AdapterError::AuthDenied(_))));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry_transient(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AdapterError::transient("backend busy"))
                    } else {
                        Ok("started")
                    }
                }
            },
            fast(),
            4,
            &cancel,
        )
        .await;

        assert_eq!(result.unwrap(), "started");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_attempts_are_capped() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = retry_transient(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AdapterError::transient("backend busy")) }
            },
            fast(),
            3,
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(AdapterError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_never_repeats_permanent_errors() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = retry_transient(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AdapterError::quota("cores exhausted")) }
            },
            fast(),
            5,
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(AdapterError::QuotaExceeded(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
