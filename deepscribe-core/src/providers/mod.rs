//! Text generation service implementations and the retry policy shared by them.
//!
//! Provides a concrete implementation of the `TextGenerationService` trait for
//! OpenAI-compatible APIs (OpenAI, Azure, Ollama, vLLM, LM Studio).

pub mod openai_compat;

use crate::config::RetryConfig;
use crate::error::LlmError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

pub use openai_compat::OpenAiCompatibleService;

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`), `LlmError::Connection`,
/// `LlmError::Timeout` and server-side failures. Permanent errors (auth, parse, malformed
/// output) return immediately. A transient failure on the last attempt is reported as
/// `LlmError::ExhaustedRetries`.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    label: impl Display,
    mut operation: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    tracing::warn!(
                        operation = %label,
                        attempts = attempt,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(LlmError::ExhaustedRetries {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }

                let backoff_ms = compute_backoff(config, attempt - 1, &e);
                tracing::warn!(
                    operation = %label,
                    attempt,
                    max = max_attempts,
                    backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }
}

/// Compute backoff delay, respecting rate limit retry-after hints.
pub(crate) fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    if let LlmError::RateLimited { retry_after_secs } = err {
        return (retry_after_secs * 1000).max(computed);
    }
    computed
}

/// Pure exponential backoff, capped at `max_backoff_ms`.
pub(crate) fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    base.min(config.max_backoff_ms as f64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_compute_backoff_exponential() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 1000);
        assert_eq!(compute_exponential_backoff(&config, 1), 2000);
        assert_eq!(compute_exponential_backoff(&config, 2), 4000);
    }

    #[test]
    fn test_compute_backoff_respects_cap() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_backoff_ms: 1000,
            max_backoff_ms: 3000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(compute_exponential_backoff(&config, 2), 3000); // capped
    }

    #[test]
    fn test_compute_backoff_rate_limit_uses_server_value() {
        let config = RetryConfig::default();
        let err = LlmError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 30_000);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_first_try() {
        let config = RetryConfig::immediate(3);
        let result = with_retry(&config, "test", || async { Ok::<_, LlmError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error_no_retry() {
        let config = RetryConfig::immediate(3);
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(&config, "test", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(LlmError::AuthFailed {
                    provider: "test".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_after_transient_errors() {
        let config = RetryConfig::immediate(3);
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(&config, "test", || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(LlmError::Connection {
                        message: "reset".into(),
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts() {
        let config = RetryConfig::immediate(2);
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(&config, "test", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(LlmError::Timeout { timeout_secs: 1 })
            }
        })
        .await;
        match result {
            Err(LlmError::ExhaustedRetries { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
