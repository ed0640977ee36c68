//! Bounded linear-backoff retry for presence writes.
//!
//! Every network write in the engine goes through [`RetryCoordinator`].
//! Operations are re-issued verbatim, so callers must pass idempotent work.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use presencekit_core::config::RetryConfig;
use presencekit_core::error::AppError;
use presencekit_core::result::AppResult;

/// Retry wrapper with a cooldown loop for connection attempts.
#[derive(Debug)]
pub struct RetryCoordinator {
    config: RetryConfig,
    /// Failed connection attempts since the last success or cooldown.
    connection_attempts: AtomicU32,
    cancel: CancellationToken,
}

impl RetryCoordinator {
    /// Create a coordinator that stops retrying once `cancel` fires.
    pub fn new(config: RetryConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            connection_attempts: AtomicU32::new(0),
            cancel,
        }
    }

    /// Retry settings in use.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` up to `max_attempts` times, sleeping `base_delay * n` after
    /// the n-th failure. Returns the first success or the last error. A
    /// non-transient error is returned at once.
    pub async fn attempt<T, F, Fut>(
        &self,
        operation: &str,
        max_attempts: u32,
        base_delay: Duration,
        mut op: F,
    ) -> AppResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.check_cancelled(operation)?;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max_attempts => {
                    warn!(operation, attempts = attempt, error = %e, "Retries exhausted");
                    return Err(e);
                }
                Err(e) if !e.is_transient() => {
                    warn!(operation, attempt, error = %e, "Permanent failure, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    let delay = base_delay * attempt;
                    debug!(operation, attempt, ?delay, error = %e, "Attempt failed, retrying");
                    self.pause(operation, delay).await?;
                    attempt += 1;
                }
            }
        }
    }

    /// [`attempt`](Self::attempt) with the configured bounds.
    pub async fn retry<T, F, Fut>(&self, operation: &str, op: F) -> AppResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.attempt(
            operation,
            self.config.max_attempts,
            self.config.base_delay(),
            op,
        )
        .await
    }

    /// Retry a connection attempt until it succeeds or the coordinator is
    /// cancelled. After `max_attempts` consecutive failures the coordinator
    /// sleeps the cooldown and starts again from attempt 1.
    pub async fn attempt_connection<T, F, Fut>(&self, operation: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        loop {
            self.check_cancelled(operation)?;
            let attempt = self.connection_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match op(attempt).await {
                Ok(value) => {
                    self.reset();
                    return Ok(value);
                }
                Err(e) if attempt >= max_attempts => {
                    let cooldown = self.config.cooldown();
                    warn!(operation, attempts = attempt, ?cooldown, error = %e, "Connection attempts exhausted, cooling down");
                    self.pause(operation, cooldown).await?;
                    self.reset();
                }
                Err(e) => {
                    let delay = self.config.base_delay() * attempt;
                    debug!(operation, attempt, ?delay, error = %e, "Connection attempt failed");
                    self.pause(operation, delay).await?;
                }
            }
        }
    }

    /// Zero the connection attempt counter.
    pub fn reset(&self) {
        self.connection_attempts.store(0, Ordering::SeqCst);
    }

    /// Connection attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.connection_attempts.load(Ordering::SeqCst)
    }

    /// Stop every pending and future retry.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn check_cancelled(&self, operation: &str) -> AppResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::cancelled(format!("{operation} cancelled")));
        }
        Ok(())
    }

    async fn pause(&self, operation: &str, delay: Duration) -> AppResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(AppError::cancelled(format!("{operation} cancelled"))),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
