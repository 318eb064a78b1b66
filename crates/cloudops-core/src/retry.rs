//! Caller-side retry for idempotent calls
//!
//! Nothing in the client, cursor or coordinator retries on its own. A caller
//! that wants to retry wraps a single call in [`with_retries`], which only
//! agrees to repeat actions that are safe to repeat.

use crate::cancel::or_cancelled;
use crate::error::{RawFailure, RetryError, classify};
use crate::model::Action;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff settings for [`with_retries`]
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }
}

/// Run `op`, retrying on retryable failures while `action` is idempotent
///
/// Non-idempotent actions are attempted exactly once regardless of the
/// failure. The last failure is returned classified. `cancel` is checked
/// before every attempt and raced against each attempt and each backoff
/// delay.
pub async fn with_retries<T, F, Fut>(
    config: &RetryConfig,
    action: Action,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RawFailure>>,
{
    let attempts = if action.is_idempotent() {
        config.max_attempts.max(1)
    } else {
        1
    };

    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let failure = match or_cancelled(cancel, op()).await {
            None => return Err(RetryError::Cancelled),
            Some(Ok(value)) => return Ok(value),
            Some(Err(raw)) => classify(&raw),
        };

        if !failure.retryable || attempt >= attempts {
            return Err(RetryError::Failed(failure));
        }

        let delay = config.delay_after(attempt);
        tracing::warn!(
            %action,
            attempt,
            kind = %failure.kind,
            "retrying in {:?}: {}",
            delay,
            failure.message
        );
        if or_cancelled(cancel, tokio::time::sleep(delay)).await.is_none() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn failed_kind<T: std::fmt::Debug>(result: Result<T, RetryError>) -> ErrorKind {
        match result {
            Err(RetryError::Failed(err)) => err.kind,
            other => panic!("expected a classified failure, got {other:?}"),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_after(1), Duration::from_secs(1));
        assert_eq!(config.delay_after(2), Duration::from_secs(2));
        assert_eq!(config.delay_after(3), Duration::from_secs(4));
        assert_eq!(config.delay_after(10), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idempotent_action_retried_until_success() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = with_retries(&RetryConfig::default(), Action::Delete, &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RawFailure::remote(503, "unavailable"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_idempotent_action_attempted_once() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), _> =
            with_retries(&RetryConfig::default(), Action::Create, &cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RawFailure::remote(429, "slow down")) }
            })
            .await;

        assert_eq!(failed_kind(result), ErrorKind::Throttled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_not_repeated() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), _> =
            with_retries(&RetryConfig::default(), Action::Describe, &cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RawFailure::remote(404, "gone")) }
            })
            .await;

        assert_eq!(failed_kind(result), ErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 4,
            ..RetryConfig::default()
        };
        let cancel = CancellationToken::new();
        let result: Result<(), _> = with_retries(&config, Action::List, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RawFailure::remote(500, "boom")) }
        })
        .await;

        assert_eq!(failed_kind(result), ErrorKind::Transient);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();

        let config = RetryConfig::default();
        let result: Result<(), _> = with_retries(&config, Action::List, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RawFailure::remote(503, "unavailable")) }
        })
        .await;

        assert_eq!(result, Err(RetryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });
        let started = Instant::now();

        let config = RetryConfig::default();
        let result: Result<(), _> = with_retries(&config, Action::List, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RawFailure::remote(503, "unavailable")) }
        })
        .await;

        assert_eq!(result, Err(RetryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
