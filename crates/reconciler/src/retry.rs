//! Bounded retry around directory calls.
//!
//! Only [`DirectoryError::Unavailable`] is retried. Every attempt runs under the
//! per-call timeout. Once shutdown is requested no further attempt is started;
//! a call already in flight is left to finish.

use crate::Shutdown;
use conductor_directory::{DirectoryError, Result as DirectoryResult};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound for a single directory call; expiry counts as `Unavailable`.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Attempt counter and next delay of one retried call.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    next_delay: Duration,
    max_backoff: Duration,
}

impl RetryState {
    #[must_use]
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.max_attempts.max(1),
            next_delay: policy.initial_backoff.min(policy.max_backoff),
            max_backoff: policy.max_backoff,
        }
    }

    /// Attempts started so far.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn begin_attempt(&mut self) {
        self.attempt += 1;
    }

    /// Records a failed attempt. Returns the delay before the next attempt, or `None`
    /// once the budget is spent.
    pub fn on_failure(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self.next_delay;
        self.next_delay = self.next_delay.saturating_mul(2).min(self.max_backoff);
        Some(delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Non-transient error, returned on the attempt that produced it.
    Permanent { error: DirectoryError, attempts: u32 },
    Exhausted { error: DirectoryError, attempts: u32 },
    /// Shutdown was requested. `last_error` is `None` when no attempt was made.
    Cancelled {
        last_error: Option<DirectoryError>,
        attempts: u32,
    },
}

impl RetryError {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&DirectoryError> {
        match self {
            RetryError::Permanent { error, .. } | RetryError::Exhausted { error, .. } => {
                Some(error)
            }
            RetryError::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }
}

/// Runs `call` until it succeeds, fails permanently, exhausts the policy or shutdown
/// is requested. `on_retry` is told about every scheduled retry.
///
/// On success returns the value and the number of attempts it took.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    shutdown: &Shutdown,
    mut on_retry: impl FnMut(u32, &DirectoryError, Duration),
    mut call: F,
) -> Result<(T, u32), RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DirectoryResult<T>>,
{
    let mut state = RetryState::new(policy);
    let mut shutdown = shutdown.clone();

    loop {
        if shutdown.is_triggered() {
            return Err(RetryError::Cancelled {
                last_error: None,
                attempts: state.attempt(),
            });
        }
        state.begin_attempt();
        let attempts = state.attempt();

        let error = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(Ok(value)) => return Ok((value, attempts)),
            Ok(Err(error)) => error,
            Err(_) => DirectoryError::Unavailable(format!(
                "call timed out after {:?}",
                policy.call_timeout
            )),
        };

        if !error.is_transient() {
            return Err(RetryError::Permanent { error, attempts });
        }
        let Some(delay) = state.on_failure() else {
            return Err(RetryError::Exhausted { error, attempts });
        };
        if shutdown.is_triggered() {
            return Err(RetryError::Cancelled {
                last_error: Some(error),
                attempts,
            });
        }

        on_retry(attempts, &error, delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.triggered() => {
                return Err(RetryError::Cancelled {
                    last_error: Some(error),
                    attempts,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown_channel;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            call_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap_and_stops_at_budget() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            call_timeout: Duration::from_secs(1),
        };
        let mut state = RetryState::new(&policy);
        let mut delays = Vec::new();
        loop {
            state.begin_attempt();
            match state.on_failure() {
                Some(delay) => delays.push(delay.as_millis()),
                None => break,
            }
        }
        assert_eq!(delays, vec![100, 200, 300, 300]);
        assert_eq!(state.attempt(), 5);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let mut state = RetryState::new(&fast_policy(0));
        state.begin_attempt();
        assert_eq!(state.on_failure(), None);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();
        let result = run_with_retry(
            &fast_policy(3),
            &Shutdown::never(),
            |attempt, _, _| retries.push(attempt),
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DirectoryError::Unavailable("503".into()))
                } else {
                    Ok("done")
                }
            },
        )
        .await;

        assert_eq!(result, Ok(("done", 3)));
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> = run_with_retry(
            &fast_policy(5),
            &Shutdown::never(),
            |_, _, _| {},
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DirectoryError::Conflict("exists".into()))
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Permanent { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_last_error_and_attempts() {
        let result: Result<((), u32), _> = run_with_retry(
            &fast_policy(3),
            &Shutdown::never(),
            |_, _, _| {},
            || async { Err(DirectoryError::Unavailable("down".into())) },
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { .. }));
        assert_eq!(err.attempts(), 3);
        assert!(err.error().is_some_and(DirectoryError::is_transient));
    }

    #[tokio::test]
    async fn slow_call_times_out_as_unavailable() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(10),
            ..fast_policy(1)
        };
        let result: Result<((), u32), _> = run_with_retry(
            &policy,
            &Shutdown::never(),
            |_, _, _| {},
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { attempts: 1, .. }));
        assert!(err.error().unwrap().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn shutdown_stops_retrying_between_attempts() {
        let (tx, shutdown) = shutdown_channel();
        let calls = AtomicU32::new(0);
        let mut retries = 0;

        let result: Result<((), u32), _> = run_with_retry(
            &fast_policy(10),
            &shutdown,
            |_, _, _| retries += 1,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tx.send(true).unwrap();
                Err(DirectoryError::Unavailable("down".into()))
            },
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Cancelled { attempts: 1, .. }));
        assert!(err.error().is_some_and(DirectoryError::is_transient));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retries, 0);
    }

    #[tokio::test]
    async fn no_attempt_starts_after_shutdown() {
        let (tx, shutdown) = shutdown_channel();
        tx.send(true).unwrap();
        let calls = AtomicU32::new(0);

        let result: Result<((), u32), _> = run_with_retry(
            &fast_policy(3),
            &shutdown,
            |_, _, _| {},
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert_eq!(
            result,
            Err(RetryError::Cancelled {
                last_error: None,
                attempts: 0
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
