//! Circuit breaker façade
//!
//! Ties the pieces together for every call:
//!
//! ```text
//! call(op)
//!   → bulkhead permit (optional)         ── none free → CapacityExceeded
//!   → StateMachine::may_execute(now)     ── Reject    → CircuitOpen / fallback
//!   → TimeoutSupervisor::supervise(op)   ── deadline  → Timeout outcome
//!   → classifier (optional)
//!   → StateMachine::on_outcome(outcome)
//!   → caller result settled, then observers notified
//! ```
//!
//! The state machine lock is only held for the two synchronous decisions,
//! never while the operation runs.

use crate::{
    BreakerConfig, CircuitState, Outcome, OutcomeKind,
    builder::CircuitBuilder,
    bulkhead::BulkheadSemaphore,
    callbacks::{EventSink, Observers, StateTransition, SubscriptionId},
    classifier::{FailureClassifier, FailureContext},
    errors::{BreakerError, InvalidConfig},
    state::{CallTicket, Decision, StateMachine},
    timeout::{Execution, TimeoutSupervisor},
    window::WindowSnapshot,
};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// The downstream call being guarded
///
/// Implemented for every `Fn(A) -> impl Future<Output = Result<T, E>>`, so a
/// plain async closure works; implement it by hand for a client type.
pub trait ProtectedOperation<A> {
    type Output;
    type Error;

    fn invoke(&self, args: A) -> impl Future<Output = Result<Self::Output, Self::Error>>;
}

impl<A, F, Fut, T, E> ProtectedOperation<A> for F
where
    F: Fn(A) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    type Output = T;
    type Error = E;

    fn invoke(&self, args: A) -> impl Future<Output = Result<T, E>> {
        self(args)
    }
}

/// Context provided to fallback closures when a call is rejected
#[derive(Debug, Clone)]
pub struct FallbackContext {
    /// Circuit name
    pub circuit_name: String,
    /// State observed when the call was rejected
    pub state: CircuitState,
    /// When the circuit opened, if it is open
    pub opened_at: Option<Instant>,
}

/// Type alias for fallback function
pub type FallbackFn<T, E> = Box<dyn FnOnce(&FallbackContext) -> Result<T, E> + Send>;

/// Options for circuit breaker calls
pub struct CallOptions<T, E> {
    /// Called instead of returning a rejection error
    pub fallback: Option<FallbackFn<T, E>>,
}

impl<T, E> Default for CallOptions<T, E> {
    fn default() -> Self {
        Self { fallback: None }
    }
}

impl<T, E> CallOptions<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&FallbackContext) -> Result<T, E> + Send + 'static,
    {
        self.fallback = Some(Box::new(f));
        self
    }
}

/// Circuit breaker public API
///
/// Cheap to share: wrap it in an `Arc` and call it from any number of tasks.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    machine: Mutex<StateMachine>,
    observers: Observers,
    supervisor: TimeoutSupervisor,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    bulkhead: Option<BulkheadSemaphore>,
}

impl CircuitBreaker {
    /// Create a breaker with no observers, classifier or bulkhead
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self, InvalidConfig> {
        config.validate()?;
        Ok(Self::from_parts(name.into(), config, None, None))
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> CircuitBuilder {
        CircuitBuilder::new(name)
    }

    /// Assemble a breaker from an already validated config (used by builder)
    pub(crate) fn from_parts(
        name: String,
        config: BreakerConfig,
        failure_classifier: Option<Arc<dyn FailureClassifier>>,
        bulkhead: Option<BulkheadSemaphore>,
    ) -> Self {
        Self {
            machine: Mutex::new(StateMachine::new(name.clone(), config.clone())),
            supervisor: TimeoutSupervisor::new(config.call_timeout),
            observers: Observers::new(),
            name,
            config,
            failure_classifier,
            bulkhead,
        }
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        self.call_with_options(operation, CallOptions::new()).await
    }

    /// Execute a reusable operation with the given arguments
    pub async fn fire<A, Op>(
        &self,
        operation: &Op,
        args: A,
    ) -> Result<Op::Output, BreakerError<Op::Error>>
    where
        Op: ProtectedOperation<A>,
        Op::Error: 'static,
    {
        self.call(|| operation.invoke(args)).await
    }

    /// Execute an operation, running the fallback if the call is rejected
    pub async fn call_with_options<F, Fut, T, E>(
        &self,
        operation: F,
        options: CallOptions<T, E>,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        let _permit = match &self.bulkhead {
            Some(bulkhead) => match bulkhead.try_acquire() {
                Some(permit) => Some(permit),
                None => {
                    tracing::debug!(circuit = %self.name, limit = bulkhead.limit(), "bulkhead full");
                    let err = BreakerError::CapacityExceeded {
                        circuit: self.name.clone(),
                        limit: bulkhead.limit(),
                    };
                    return self.reject(err, options);
                }
            },
            None => None,
        };

        let admission = {
            let mut machine = self.lock();
            let admission = machine.may_execute(Instant::now());
            if self.queue(machine, admission.transition) {
                self.observers.flush(&self.name);
            }
            admission
        };

        let ticket = match admission.decision {
            Decision::Allow(ticket) => ticket,
            Decision::Reject => {
                let state = admission.state;
                tracing::debug!(circuit = %self.name, %state, "call rejected");
                let err = BreakerError::CircuitOpen {
                    circuit: self.name.clone(),
                    state,
                };
                return self.reject(err, options);
            }
        };

        let mut in_flight = InFlight {
            breaker: self,
            ticket,
            settled: false,
        };
        let supervised = self.supervisor.supervise(operation()).await;
        in_flight.settled = true;

        let elapsed = supervised.elapsed();
        let kind = match &supervised.execution {
            Execution::Failure(err) if !self.is_failure(err, elapsed) => OutcomeKind::Success,
            execution => execution.kind(),
        };
        let outcome = Outcome::new(kind, supervised.finished_at, elapsed);
        let mut machine = self.lock();
        let transition = machine.on_outcome(ticket, outcome);
        let queued = self.queue(machine, transition);

        let result = match supervised.execution {
            Execution::Success(value) => Ok(value),
            Execution::Failure(err) => Err(BreakerError::OperationFailed(err)),
            Execution::Timeout => Err(BreakerError::OperationTimeout {
                circuit: self.name.clone(),
                timeout: self.supervisor.timeout(),
            }),
        };

        if queued {
            self.observers.flush(&self.name);
        }
        result
    }

    /// Queue an applied transition before releasing the lock it was applied
    /// under, so observers see transitions in the order they happened
    fn queue(
        &self,
        machine: MutexGuard<'_, StateMachine>,
        transition: Option<StateTransition>,
    ) -> bool {
        let Some(transition) = transition else {
            return false;
        };
        self.observers.enqueue(transition);
        drop(machine);
        true
    }

    fn reject<T, E>(
        &self,
        err: BreakerError<E>,
        options: CallOptions<T, E>,
    ) -> Result<T, BreakerError<E>> {
        match options.fallback {
            Some(fallback) => {
                let state = match &err {
                    BreakerError::CircuitOpen { state, .. } => *state,
                    _ => self.state(),
                };
                let ctx = FallbackContext {
                    circuit_name: self.name.clone(),
                    state,
                    opened_at: self.opened_at(),
                };
                fallback(&ctx).map_err(BreakerError::OperationFailed)
            }
            None => Err(err),
        }
    }

    fn is_failure<E: 'static>(&self, err: &E, duration: Duration) -> bool {
        match &self.failure_classifier {
            Some(classifier) => classifier.is_failure(&FailureContext {
                circuit_name: &self.name,
                error: err,
                duration,
            }),
            None => true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// When the circuit opened; `None` unless currently Open
    pub fn opened_at(&self) -> Option<Instant> {
        self.lock().opened_at()
    }

    /// Rolling-window statistics as of now
    pub fn stats(&self) -> WindowSnapshot {
        self.lock().snapshot(Instant::now())
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        self.observers.subscribe(sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Clear statistics and force the circuit Closed
    pub fn reset(&self) {
        let mut machine = self.lock();
        let transition = machine.reset(Instant::now());
        if self.queue(machine, transition) {
            self.observers.flush(&self.name);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .field("observers", &self.observers)
            .field(
                "failure_classifier",
                &self
                    .failure_classifier
                    .as_ref()
                    .map(|_| "<dyn FailureClassifier>"),
            )
            .field("bulkhead", &self.bulkhead)
            .finish()
    }
}

/// Resolves an admitted call whose future was dropped before completing
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    ticket: CallTicket,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut machine = self.breaker.lock();
        let transition = machine.abandon(self.ticket, Instant::now());
        if self.breaker.queue(machine, transition) {
            self.breaker.observers.flush(&self.breaker.name);
        }
    }
}
