//! Fixed-delay retry for transient failures
//!
//! The loop stops at the first success, at a cancellation or auth failure,
//! or when the budget is spent. A 401 is returned to the caller immediately without
//! consuming budget: session recovery owns that path.
//!
//! Backoff sleeps observe the call's cancellation token.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{RequestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Run `attempt` until it settles. The argument is the zero-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        path: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut remaining = self.max_retries;
        let mut number = 0;
        loop {
            let error = match attempt(number).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if error.is_unauthorized() || !error.is_retryable() || remaining == 0 {
                return Err(error);
            }

            remaining -= 1;
            number += 1;
            crate::metrics::record_retry();
            warn!(
                path,
                attempt = number,
                remaining,
                kind = error.kind.label(),
                status = ?error.status,
                delay_ms = self.delay.as_millis() as u64,
                "retrying request"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RequestError::aborted(path)),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
    }
}
