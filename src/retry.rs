use log::{debug, warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::{ReporterError, Result};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Fixed delay between attempts
    pub delay: Duration,

    /// Maximum number of attempts, unbounded when `None`
    pub max_attempts: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(5_000),
            max_attempts: None,
        }
    }
}

/// Execute an operation until it succeeds, waiting a fixed delay between
/// attempts.
///
/// `on_failure` sees every failed attempt before the delay starts.
/// Returns `Ok(None)` once `cancel` fires; a pending attempt or delay is
/// abandoned at that point.
pub async fn retry_until_ok<F, Fut, T>(
    mut operation: F,
    config: &RetryConfig,
    cancel: &CancellationToken,
    context: &str,
    mut on_failure: impl FnMut(usize, &anyhow::Error),
) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            outcome = operation() => outcome,
        };

        let err = match outcome {
            Ok(result) => return Ok(Some(result)),
            Err(err) => err,
        };

        attempts += 1;
        on_failure(attempts, &err);

        if config.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(ReporterError::retry(context, attempts, err).into());
        }

        warn!(
            "{} failed (attempt {}), retrying in {:?}: {}",
            context, attempts, config.delay, err
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            _ = sleep(config.delay) => {}
        }

        debug!("Retrying {} after {:?} delay", context, config.delay);
    }
}

/// Builder for custom retry configurations
pub struct RetryBuilder {
    config: RetryConfig,
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.config.max_attempts = Some(attempts);
        self
    }

    pub fn build(self) -> RetryConfig {
        self.config
    }
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn flaky(failures: usize) -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<Result<usize>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let operation = move || {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if call > failures {
                Ok(call)
            } else {
                Err(ReporterError::Connection("down".to_string()).into())
            })
        };
        (calls, operation)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_fixed_delay() {
        let (calls, operation) = flaky(3);
        let config = RetryBuilder::new().delay(Duration::from_millis(100)).build();
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();

        let start = tokio::time::Instant::now();
        let result = retry_until_ok(operation, &config, &cancel, "probe", |attempt, _| {
            seen.push(attempt)
        })
        .await
        .unwrap();

        assert_eq!(result, Some(4));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(seen, [1, 2, 3]);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(400), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let (calls, operation) = flaky(usize::MAX);
        let config = RetryBuilder::new()
            .delay(Duration::from_millis(10))
            .max_attempts(3)
            .build();
        let cancel = CancellationToken::new();

        let err = retry_until_ok(operation, &config, &cancel, "probe", |_, _| {})
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            err.downcast_ref::<ReporterError>(),
            Some(ReporterError::Retry(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_delay() {
        let (calls, operation) = flaky(usize::MAX);
        let config = RetryConfig::default();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(7_500)).await;
            canceller.cancel();
        });

        let result = retry_until_ok(operation, &config, &cancel, "probe", |_, _| {})
            .await
            .unwrap();

        assert_eq!(result, None);
        // attempts at 0s and 5s, cancelled during the second delay
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_is_unbounded_five_seconds() {
        let config = RetryConfig::default();
        assert_eq!(config.delay, Duration::from_secs(5));
        assert_eq!(config.max_attempts, None);
    }
}
