//! Tripwire - async circuit breaker with a rolling error-rate window
//!
//! This crate guards calls to a flaky downstream dependency:
//! - Bucketed rolling window computing error percentage and volume
//! - State machine for the breaker lifecycle (Closed → Open → HalfOpen)
//! - Deadline supervision that turns slow calls into timeouts
//! - Single probe call while half-open, every other call fails fast
//! - Observer registry notified on every state transition
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tripwire::CircuitBreaker;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::builder("payment_api")
//!     .call_timeout(Duration::from_secs(3))
//!     .error_threshold_percent(50.0)
//!     .minimum_volume(4)
//!     .rolling_window(Duration::from_secs(10))
//!     .rolling_window_buckets(10)
//!     .reset_timeout(Duration::from_secs(10))
//!     .on_open(|name, _| println!("Circuit {} opened!", name))
//!     .build()?;
//!
//! let receipt = breaker
//!     .call(|| async { Ok::<_, std::io::Error>("txn-xyz123") })
//!     .await?;
//! println!("paid: {receipt}");
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod bulkhead;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod state;
pub mod timeout;
pub mod window;

pub use builder::CircuitBuilder;
pub use bulkhead::{BulkheadGuard, BulkheadSemaphore};
pub use callbacks::{EventSink, Observers, StateTransition, SubscriptionId, TransitionKind};
pub use circuit::{CallOptions, CircuitBreaker, FallbackContext, ProtectedOperation};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use config::BreakerConfig;
pub use errors::{BreakerError, InvalidConfig};
pub use state::{Admission, CallTicket, Decision, StateMachine};
pub use timeout::{Execution, Supervised, TimeoutSupervisor};
pub use window::{StatsWindow, WindowSnapshot};

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Protective state of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls pass through and outcomes are counted
    Closed,
    /// Calls are rejected without executing
    Open,
    /// A single probe call is permitted
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a protected call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    Failure,
    /// Deadline fired first; counts as an error
    Timeout,
}

impl OutcomeKind {
    pub fn is_error(&self) -> bool {
        !matches!(self, OutcomeKind::Success)
    }
}

/// A single outcome recorded by the circuit breaker
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub kind: OutcomeKind,
    /// Completion instant (or deadline instant for a timeout)
    pub timestamp: Instant,
    pub duration: Duration,
}

impl Outcome {
    pub fn new(kind: OutcomeKind, timestamp: Instant, duration: Duration) -> Self {
        Self {
            kind,
            timestamp,
            duration,
        }
    }
}
