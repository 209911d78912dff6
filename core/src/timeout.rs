//! Deadline supervision for protected operations
//!
//! The operation future is raced against `tokio::time::timeout`. When the
//! deadline wins the future is dropped, so whatever it would have produced
//! later can never reach a caller or the statistics.

use crate::OutcomeKind;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Result of a supervised execution
#[derive(Debug)]
pub enum Execution<T, E> {
    Success(T),
    Failure(E),
    Timeout,
}

impl<T, E> Execution<T, E> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Execution::Success(_) => OutcomeKind::Success,
            Execution::Failure(_) => OutcomeKind::Failure,
            Execution::Timeout => OutcomeKind::Timeout,
        }
    }
}

/// Execution plus timing
#[derive(Debug)]
pub struct Supervised<T, E> {
    pub execution: Execution<T, E>,
    pub started_at: Instant,
    pub finished_at: Instant,
}

impl<T, E> Supervised<T, E> {
    pub fn elapsed(&self) -> Duration {
        self.finished_at.saturating_duration_since(self.started_at)
    }
}

/// Races operations against a fixed deadline
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSupervisor {
    timeout: Duration,
}

impl TimeoutSupervisor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start `operation(args)` and wait for it, at most `timeout`
    pub async fn run<A, F, Fut, T, E>(&self, operation: F, args: A) -> Supervised<T, E>
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.supervise(operation(args)).await
    }

    /// Await an already-built operation future under the deadline
    pub async fn supervise<Fut, T, E>(&self, future: Fut) -> Supervised<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let started_at = Instant::now();
        let execution = match tokio::time::timeout(self.timeout, future).await {
            Ok(Ok(value)) => Execution::Success(value),
            Ok(Err(err)) => Execution::Failure(err),
            Err(_elapsed) => Execution::Timeout,
        };

        Supervised {
            execution,
            started_at,
            finished_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fast_success() {
        let supervisor = TimeoutSupervisor::new(Duration::from_secs(3));

        let result = supervisor
            .run(|amount: u32| async move { Ok::<_, String>(amount * 2) }, 50)
            .await;

        assert!(matches!(result.execution, Execution::Success(100)));
        assert_eq!(result.execution.kind(), OutcomeKind::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_passed_through() {
        let supervisor = TimeoutSupervisor::new(Duration::from_secs(3));

        let result = supervisor
            .supervise(async { Err::<(), _>("Payment Processor Error") })
            .await;

        match result.execution {
            Execution::Failure(e) => assert_eq!(e, "Payment Processor Error"),
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_times_out_at_deadline() {
        let supervisor = TimeoutSupervisor::new(Duration::from_secs(3));

        let result = supervisor
            .supervise(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>("too late")
            })
            .await;

        assert!(matches!(result.execution, Execution::Timeout));
        assert_eq!(result.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_is_discarded() {
        let supervisor = TimeoutSupervisor::new(Duration::from_millis(100));
        let completed = Arc::new(AtomicBool::new(false));
        let completed_clone = completed.clone();

        let result = supervisor
            .supervise(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                completed_clone.store(true, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;
        assert!(matches!(result.execution, Execution::Timeout));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(
            !completed.load(Ordering::SeqCst),
            "timed-out operation must not run to completion"
        );
    }
}
