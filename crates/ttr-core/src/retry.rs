//! Exponential backoff with jitter, rate-limit awareness, and cancellation.
//!
//! Two entry points: [`retry`] for plain fallible operations classified by
//! error message, and [`retry_http`] for operations yielding an HTTP-like
//! response whose status and `Retry-After` hint drive the retry decision.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use snafu::prelude::*;
use tokio_util::sync::CancellationToken;

/// Error-message substrings that mark a failure as retriable. The match is
/// case-sensitive and the set is closed.
const RETRIABLE_MESSAGES: [&str; 6] = [
    "timeout",
    "connection refused",
    "connection reset",
    "temporary failure",
    "no such host",
    "TLS handshake timeout",
];

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try. Zero means the
    /// operation runs exactly once.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the computed delay.
    pub max_delay: Duration,
    /// Factor the delay grows by per attempt.
    pub multiplier: f64,
    /// Add uniform random jitter in `[0, 0.25 * delay)`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Nominal delay before retry attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let mut delay =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        delay = delay.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Non-cryptographic randomness is enough to spread herd retries.
            delay += rand::rng().random::<f64>() * 0.25 * delay;
        }

        Duration::from_secs_f64(delay)
    }
}

/// Whether an error message marks a retriable failure.
pub fn is_retriable_message(message: &str) -> bool {
    RETRIABLE_MESSAGES.iter().any(|m| message.contains(m))
}

/// Whether an HTTP status is retriable: server errors and 429.
pub fn is_retriable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

/// The view of an HTTP response the retry loop needs.
pub trait HttpLike {
    fn status(&self) -> u16;
    /// Parsed `Retry-After` hint, when the response carried one.
    fn retry_after(&self) -> Option<Duration>;
}

/// Terminal outcome of a retry loop.
#[derive(Debug, Snafu)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// The operation failed with an error outside the retriable set.
    #[snafu(display("{source}"))]
    NotRetriable { source: E },

    /// All attempts were consumed; wraps the last underlying error.
    #[snafu(display("max retries exceeded: {source}"))]
    MaxRetriesExceeded { source: E },

    /// All attempts were consumed on a retriable HTTP status.
    #[snafu(display("max retries exceeded: HTTP {status}"))]
    MaxRetriesStatus { status: u16 },

    /// The cancellation token fired during a backoff wait.
    #[snafu(display("retry cancelled: {message}"))]
    Cancelled { message: String },
}

/// Run `op` until it succeeds, fails non-retriably, or the policy is spent.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err = match op().await {
        Ok(value) => return Ok(value),
        Err(err) if !is_retriable_message(&err.to_string()) => {
            return Err(RetryError::NotRetriable { source: err });
        }
        Err(err) => err,
    };

    for attempt in 1..=policy.max_retries {
        if !sleep_or_cancel(cancel, policy.backoff(attempt)).await {
            return Err(RetryError::Cancelled {
                message: last_err.to_string(),
            });
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !is_retriable_message(&err.to_string()) => {
                return Err(RetryError::NotRetriable { source: err });
            }
            Err(err) => last_err = err,
        }
    }

    Err(RetryError::MaxRetriesExceeded { source: last_err })
}

/// Like [`retry`], for operations producing an HTTP-like response.
///
/// Responses with status `< 500` and `!= 429` are returned immediately — the
/// caller distinguishes success from non-retriable client errors. Retriable
/// statuses back off; a `Retry-After` hint on the response overrides the
/// nominal delay.
pub async fn retry_http<R, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<R, RetryError<E>>
where
    R: HttpLike,
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    enum Failure<E> {
        Status { status: u16, hint: Option<Duration> },
        Err(E),
    }

    impl<E: std::error::Error> Failure<E> {
        fn message(&self) -> String {
            match self {
                Failure::Status { status, .. } => format!("HTTP {status}"),
                Failure::Err(err) => err.to_string(),
            }
        }
    }

    let mut last = match op().await {
        Ok(resp) if !is_retriable_status(resp.status()) => return Ok(resp),
        Ok(resp) => Failure::Status {
            status: resp.status(),
            hint: resp.retry_after(),
        },
        Err(err) if !is_retriable_message(&err.to_string()) => {
            return Err(RetryError::NotRetriable { source: err });
        }
        Err(err) => Failure::Err(err),
    };

    for attempt in 1..=policy.max_retries {
        let mut delay = policy.backoff(attempt);
        if let Failure::Status { hint: Some(hint), .. } = last {
            delay = hint;
        }

        if !sleep_or_cancel(cancel, delay).await {
            return Err(RetryError::Cancelled {
                message: last.message(),
            });
        }

        last = match op().await {
            Ok(resp) if !is_retriable_status(resp.status()) => return Ok(resp),
            Ok(resp) => Failure::Status {
                status: resp.status(),
                hint: resp.retry_after(),
            },
            Err(err) if !is_retriable_message(&err.to_string()) => {
                return Err(RetryError::NotRetriable { source: err });
            }
            Err(err) => Failure::Err(err),
        };
    }

    match last {
        Failure::Status { status, .. } => Err(RetryError::MaxRetriesStatus { status }),
        Failure::Err(err) => Err(RetryError::MaxRetriesExceeded { source: err }),
    }
}

/// Sleep for `delay`, returning false if the token fires first.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Snafu)]
    #[snafu(display("{message}"))]
    struct FakeError {
        message: String,
    }

    fn fake_err(message: &str) -> FakeError {
        FakeError {
            message: message.to_string(),
        }
    }

    #[derive(Debug)]
    struct FakeResponse {
        status: u16,
        retry_after: Option<Duration>,
    }

    impl HttpLike for FakeResponse {
        fn status(&self) -> u16 {
            self.status
        }

        fn retry_after(&self) -> Option<Duration> {
            self.retry_after
        }
    }

    fn no_jitter(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(4));
    }

    #[test]
    fn backoff_jitter_stays_within_a_quarter() {
        let policy = RetryPolicy {
            jitter: true,
            ..no_jitter(3)
        };

        for _ in 0..100 {
            let delay = policy.backoff(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(126));
        }
    }

    #[test]
    fn retriable_message_match_is_case_sensitive() {
        assert!(is_retriable_message("dial tcp: connection refused"));
        assert!(is_retriable_message("request timeout while polling"));
        assert!(is_retriable_message("TLS handshake timeout"));
        assert!(!is_retriable_message("Connection Refused"));
        assert!(!is_retriable_message("invalid credentials"));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_retriable_failures() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry(&no_jitter(3), &cancel, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(fake_err("connection reset by peer"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry(&no_jitter(3), &cancel, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(fake_err("invalid credentials"))
        })
        .await;

        assert!(matches!(result, Err(RetryError::NotRetriable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_retries_runs_exactly_once() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry(&no_jitter(0), &cancel, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(fake_err("timeout"))
        })
        .await;

        assert!(matches!(result, Err(RetryError::MaxRetriesExceeded { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_wrap_the_last_error() {
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry(&no_jitter(2), &cancel, || async {
            Err(fake_err("temporary failure in name resolution"))
        })
        .await;

        match result {
            Err(err @ RetryError::MaxRetriesExceeded { .. }) => {
                assert!(err.to_string().contains("max retries exceeded"));
                assert!(err.to_string().contains("temporary failure"));
            }
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_during_wait_returns_cancelled() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = retry(&no_jitter(3), &cancel, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(fake_err("timeout"))
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_overrides_nominal_delay() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let result = retry_http(&no_jitter(3), &cancel, || async {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FakeError>(if attempt == 0 {
                FakeResponse {
                    status: 429,
                    retry_after: Some(Duration::from_secs(2)),
                }
            } else {
                FakeResponse {
                    status: 200,
                    retry_after: None,
                }
            })
        })
        .await;

        assert_eq!(result.unwrap().status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Header wins over the nominal 100ms backoff.
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_retry_until_success() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry_http(&no_jitter(3), &cancel, || async {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FakeError>(FakeResponse {
                status: if attempt < 2 { 503 } else { 200 },
                retry_after: None,
            })
        })
        .await;

        assert_eq!(result.unwrap().status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_returned_without_retry() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry_http(&no_jitter(3), &cancel, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FakeError>(FakeResponse {
                status: 404,
                retry_after: None,
            })
        })
        .await;

        assert_eq!(result.unwrap().status(), 404);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_http_retries_report_the_status() {
        let cancel = CancellationToken::new();

        let result = retry_http(&no_jitter(2), &cancel, || async {
            Ok::<_, FakeError>(FakeResponse {
                status: 500,
                retry_after: None,
            })
        })
        .await;

        match result {
            Err(RetryError::MaxRetriesStatus { status }) => assert_eq!(status, 500),
            other => panic!("expected MaxRetriesStatus, got {other:?}"),
        }
    }
}
