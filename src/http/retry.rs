//! Retry scheduling: which outcomes are transient, and how long to wait
//! before the next attempt.

use log::{debug, warn};
use std::future::Future;
use std::time::Duration;

use super::request::ResponseEnvelope;
use crate::config::RetryPolicy;
use crate::error::{ApiError, ErrorKind};

/// Statuses below 500 that are worth another attempt.
pub const RETRYABLE_STATUSES: [u16; 3] = [408, 409, 429];

/// Request timeout, lock conflict, rate limit, or any server error.
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status) || status >= 500
}

/// `min(initial_delay * 2^attempt, max_delay)`, no jitter.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| policy.initial_delay.checked_mul(factor))
        .map_or(policy.max_delay, |delay| delay.min(policy.max_delay))
}

/// Runs `operation` until it yields a final outcome or the retry budget is
/// spent. The operation receives the zero-based attempt number.
///
/// Transport failures and retryable statuses are absorbed while
/// `attempt < policy.max_retries`; afterwards the last outcome is returned
/// as-is. Any other error (e.g. validation) is returned immediately.
pub async fn with_retry<F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    operation: F,
) -> Result<ResponseEnvelope, ApiError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<ResponseEnvelope, ApiError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let outcome = operation(attempt).await;

        let reason = match &outcome {
            Ok(envelope) if is_retryable_status(envelope.status) => {
                format!("HTTP {}", envelope.status)
            }
            Ok(_) => return outcome,
            Err(e) if e.kind() == ErrorKind::TransportFailure => e.to_string(),
            Err(e) => {
                debug!("{}: non-retryable error: {}", operation_name, e);
                return outcome;
            }
        };

        if attempt >= policy.max_retries {
            debug!(
                "{}: giving up after {} attempt(s) ({})",
                operation_name,
                attempt.saturating_add(1),
                reason
            );
            return outcome;
        }

        let delay = backoff_delay(policy, attempt);
        warn!(
            "{}: attempt {}/{} failed ({}), retrying in {}ms...",
            operation_name,
            attempt.saturating_add(1),
            policy.max_retries.saturating_add(1),
            reason,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn envelope(status: u16) -> ResponseEnvelope {
        ResponseEnvelope {
            status,
            body: Value::Null,
            request_id: None,
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(5_000),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [408, 409, 429, 500, 502, 503, 529, 599] {
            assert!(is_retryable_status(status), "{} should retry", status);
        }
        for status in [200, 201, 400, 401, 403, 404, 422, 499] {
            assert!(!is_retryable_status(status), "{} should not retry", status);
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = policy(10);
        assert_eq!(backoff_delay(&policy, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(&policy, 3), Duration::from_millis(4_000));
        // 500 * 16 = 8000, capped
        assert_eq!(backoff_delay(&policy, 4), Duration::from_millis(5_000));
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let policy = policy(100);
        assert_eq!(backoff_delay(&policy, 40), Duration::from_millis(5_000));
        assert_eq!(backoff_delay(&policy, u32::MAX), Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_success_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry("test", &policy(2), |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(envelope(200))
            }
        })
        .await;

        assert_eq!(result.unwrap().status, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhausts_budget_on_retryable_status() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let result = with_retry("test", &policy(3), |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(envelope(503))
            }
        })
        .await;

        // The final envelope is handed back for interpretation.
        assert_eq!(result.unwrap().status, 503);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 500 + 1000 + 2000
        assert_eq!(start.elapsed(), Duration::from_millis(3_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_passes_attempt_numbers_in_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let _ = with_retry("test", &policy(2), |attempt| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(attempt);
                Ok(envelope(429))
            }
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_does_not_retry_client_errors() {
        for status in [400, 401, 403, 404, 422] {
            let calls = Arc::new(AtomicU32::new(0));
            let start = tokio::time::Instant::now();
            let result = with_retry("test", &policy(5), |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(envelope(status))
                }
            })
            .await;

            assert_eq!(result.unwrap().status, status);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(start.elapsed(), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_after_transport_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry("test", &policy(2), |attempt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(ApiError::transport_message("connection reset"))
                } else {
                    Ok(envelope(200))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap().status, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_surfaces_transport_failure_when_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry("test", &policy(1), |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::transport_message("connection refused"))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_validation_error_is_immediate() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry("test", &policy(3), |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::validation("bad header"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::ValidationError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    #[test_log(default_log_filter = "debug")]
    async fn test_with_retry_unbounded_budget_logs_without_overflow() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry("test", &policy(u32::MAX), |attempt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(envelope(if attempt == 0 { 503 } else { 200 }))
            }
        })
        .await;

        assert_eq!(result.unwrap().status, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_zero_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry("test", &RetryPolicy::none(), |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(envelope(500))
            }
        })
        .await;

        assert_eq!(result.unwrap().status, 500);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
