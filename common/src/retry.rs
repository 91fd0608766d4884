//! Bounded retry with exponential backoff for transient storage errors

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

/// Backoff shape and attempt budget
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: usize,

    /// Base backoff delay; later delays grow exponentially with jitter
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
        }
    }
}

/// Re-runs an operation on transient errors. Which errors are permanent is
/// decided by a predicate fixed at construction, not hard-coded here.
pub struct RetryRunner<E> {
    config: RetryConfig,
    non_retryable: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E> Clone for RetryRunner<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            non_retryable: self.non_retryable.clone(),
        }
    }
}

impl<E> RetryRunner<E> {
    pub fn new(
        config: RetryConfig,
        non_retryable: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    ) -> Self {
        Self {
            config,
            non_retryable,
        }
    }

    /// Run `action`, retrying on errors the predicate does not rule out.
    /// Exhausting the attempt budget returns the last error.
    pub async fn run<T, A, F>(&self, action: A) -> Result<T, E>
    where
        A: FnMut() -> F,
        F: Future<Output = Result<T, E>>,
    {
        let base_millis = self.config.base_delay.as_millis().max(1) as u64;
        let delays = ExponentialBackoff::from_millis(base_millis)
            .map(jitter)
            .take(self.config.max_attempts.saturating_sub(1));

        RetryIf::spawn(delays, action, |error: &E| !(self.non_retryable)(error)).await
    }
}
