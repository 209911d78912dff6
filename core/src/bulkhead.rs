//! Bulkhead for concurrency limiting
//!
//! Caps how many protected operations may execute at once. A call that finds
//! no free permit is rejected immediately; nothing waits or queues.

use crate::errors::InvalidConfig;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Non-blocking permit pool
#[derive(Debug, Clone)]
pub struct BulkheadSemaphore {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl BulkheadSemaphore {
    pub fn new(limit: usize) -> Result<Self, InvalidConfig> {
        if limit == 0 {
            return Err(InvalidConfig::new("max_concurrency", "must be at least 1"));
        }
        if limit > Semaphore::MAX_PERMITS {
            return Err(InvalidConfig::new(
                "max_concurrency",
                format!("must not exceed {}", Semaphore::MAX_PERMITS),
            ));
        }

        Ok(Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        })
    }

    /// Take a permit if one is free
    pub fn try_acquire(&self) -> Option<BulkheadGuard> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .ok()
            .map(|permit| BulkheadGuard { _permit: permit })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Permits currently held
    pub fn acquired(&self) -> usize {
        self.limit.saturating_sub(self.available())
    }
}

/// Releases its permit when dropped, including on panic or cancellation
#[derive(Debug)]
pub struct BulkheadGuard {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_limit_is_invalid() {
        let err = BulkheadSemaphore::new(0).unwrap_err();
        assert_eq!(err.field, "max_concurrency");
    }

    #[test]
    fn test_acquire_until_full_then_release() {
        let bulkhead = BulkheadSemaphore::new(2).expect("valid limit");

        let first = bulkhead.try_acquire().expect("first permit");
        let second = bulkhead.try_acquire().expect("second permit");
        assert_eq!(bulkhead.acquired(), 2);
        assert!(bulkhead.try_acquire().is_none(), "pool is exhausted");

        drop(first);
        assert_eq!(bulkhead.available(), 1);
        assert!(bulkhead.try_acquire().is_some());

        drop(second);
    }

    #[test]
    fn test_clones_share_permits() {
        let bulkhead = BulkheadSemaphore::new(1).expect("valid limit");
        let shared = bulkhead.clone();

        let _held = bulkhead.try_acquire().expect("permit");
        assert!(shared.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_released_when_task_is_cancelled() {
        let bulkhead = BulkheadSemaphore::new(1).expect("valid limit");
        let guard = bulkhead.try_acquire().expect("permit");

        let task = tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        tokio::task::yield_now().await;
        assert_eq!(bulkhead.acquired(), 1);

        task.abort();
        let _ = task.await;
        assert_eq!(bulkhead.acquired(), 0);
    }
}
