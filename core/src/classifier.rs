//! Failure classification
//!
//! Decides whether an error returned by the protected operation counts
//! against the dependency. An ignored error is still handed back to the
//! caller, but it is recorded as a success: the dependency did answer.

use std::any::Any;
use std::fmt;
use std::time::Duration;

/// What a classifier gets to look at
#[derive(Debug)]
pub struct FailureContext<'a> {
    pub circuit_name: &'a str,
    /// Downcast to the operation's error type to inspect it
    pub error: &'a dyn Any,
    /// How long the call ran before failing
    pub duration: Duration,
}

/// Decides whether an operation error counts against the dependency
///
/// # Examples
///
/// ```rust
/// use tripwire::{FailureClassifier, FailureContext};
///
/// // HTTP-style status codes: only 5xx means the dependency is unhealthy
/// #[derive(Debug)]
/// struct ServerErrorsOnly;
///
/// impl FailureClassifier for ServerErrorsOnly {
///     fn is_failure(&self, ctx: &FailureContext<'_>) -> bool {
///         match ctx.error.downcast_ref::<u16>() {
///             Some(status) => *status >= 500,
///             None => true,
///         }
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + fmt::Debug {
    /// `true` counts the error as a failure, `false` records a success
    fn is_failure(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Counts every error as a failure
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn is_failure(&self, _: &FailureContext<'_>) -> bool {
        true
    }
}

/// Classifier backed by a closure
pub struct PredicateClassifier<F>(F);

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn is_failure(&self, ctx: &FailureContext<'_>) -> bool {
        (self.0)(ctx)
    }
}

impl<F> fmt::Debug for PredicateClassifier<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PredicateClassifier(..)")
    }
}
