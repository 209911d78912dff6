//! Error types for circuit breaker operations

use crate::CircuitState;
use std::time::Duration;
use thiserror::Error;

/// Errors returned to the caller of a protected operation
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Call rejected without execution (circuit open, or a probe is already in flight)
    #[error("circuit '{circuit}' is {state}, call rejected")]
    CircuitOpen {
        circuit: String,
        state: CircuitState,
    },
    /// Bulkhead is at capacity, cannot acquire permit
    #[error("circuit '{circuit}' is at capacity (limit: {limit})")]
    CapacityExceeded { circuit: String, limit: usize },
    /// The protected operation ran and reported failure
    #[error("operation failed: {0}")]
    OperationFailed(#[source] E),
    /// The protected operation did not finish before the call timeout
    #[error("circuit '{circuit}' operation timed out after {timeout:?}")]
    OperationTimeout { circuit: String, timeout: Duration },
}

impl<E> BreakerError<E> {
    /// True when the call was rejected without running the operation
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BreakerError::CircuitOpen { .. } | BreakerError::CapacityExceeded { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BreakerError::OperationTimeout { .. })
    }

    /// The underlying operation error, if the operation ran and failed
    pub fn into_cause(self) -> Option<E> {
        match self {
            BreakerError::OperationFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Configuration rejected at construction time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid breaker config: `{field}` {reason}")]
pub struct InvalidConfig {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidConfig {
    pub(crate) fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(field: &'static str) -> Self {
        Self::new(field, "is required")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn test_open_error_message() {
        let err: BreakerError<io::Error> = BreakerError::CircuitOpen {
            circuit: "payments".to_string(),
            state: CircuitState::Open,
        };

        assert_eq!(err.to_string(), "circuit 'payments' is Open, call rejected");
        assert!(err.is_rejection());
        assert!(err.source().is_none());
    }

    #[test]
    fn test_operation_failed_exposes_cause() {
        let err = BreakerError::OperationFailed(io::Error::other("502 from upstream"));

        assert!(!err.is_rejection());
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("502 from upstream".to_string())
        );
        assert_eq!(
            err.into_cause().map(|e| e.to_string()),
            Some("502 from upstream".to_string())
        );
    }

    #[test]
    fn test_timeout_is_distinguishable() {
        let err: BreakerError<io::Error> = BreakerError::OperationTimeout {
            circuit: "payments".to_string(),
            timeout: Duration::from_secs(3),
        };

        assert!(err.is_timeout());
        assert!(err.into_cause().is_none());
    }

    #[test]
    fn test_invalid_config_message() {
        let err = InvalidConfig::missing("call_timeout");
        assert_eq!(
            err.to_string(),
            "invalid breaker config: `call_timeout` is required"
        );
    }
}
