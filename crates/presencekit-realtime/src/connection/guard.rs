//! Single-operation guard for presence mutations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use presencekit_core::error::AppError;
use presencekit_core::result::AppResult;

/// Poll interval used while waiting for the guard.
const ACQUIRE_POLL: Duration = Duration::from_millis(25);

/// Admits one presence mutation at a time.
///
/// Acquisition never waits: a caller that finds the guard held is expected
/// to drop its work.
#[derive(Debug, Clone, Default)]
pub struct OperationGuard {
    busy: Arc<AtomicBool>,
}

/// Held while a mutation runs; releases the guard on drop.
#[derive(Debug)]
pub struct GuardPermit {
    busy: Arc<AtomicBool>,
    operation: &'static str,
}

impl OperationGuard {
    /// Create a released guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard if nothing else holds it.
    pub fn try_acquire(&self, operation: &'static str) -> Option<GuardPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GuardPermit {
                busy: Arc::clone(&self.busy),
                operation,
            })
    }

    /// Whether a mutation is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the guard. Only teardown paths use this.
    pub async fn acquire_within(
        &self,
        operation: &'static str,
        timeout: Duration,
    ) -> AppResult<GuardPermit> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(permit) = self.try_acquire(operation) {
                return Ok(permit);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::timeout(operation, timeout));
            }
            tokio::time::sleep(ACQUIRE_POLL).await;
        }
    }
}

impl GuardPermit {
    /// The operation holding the guard.
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        debug!(operation = self.operation, "Presence guard released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let guard = OperationGuard::new();
        let permit = guard.try_acquire("set_online").unwrap();
        assert!(guard.is_busy());
        assert!(guard.try_acquire("set_offline").is_none());

        drop(permit);
        assert!(!guard.is_busy());
        assert!(guard.try_acquire("set_offline").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_waits_for_release() {
        let guard = OperationGuard::new();
        let permit = guard.try_acquire("register").unwrap();

        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .acquire_within("sign_out", Duration::from_secs(5))
                    .await
                    .map(|p| p.operation())
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(permit);
        assert_eq!(waiter.await.unwrap().unwrap(), "sign_out");
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_times_out() {
        let guard = OperationGuard::new();
        let _permit = guard.try_acquire("register").unwrap();
        let err = guard
            .acquire_within("sign_out", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, presencekit_core::ErrorKind::Timeout);
    }
}
