//! Observer registry for circuit breaker state transitions

use crate::CircuitState;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};
use tokio::time::Instant;

/// Notification kind derived from the state being entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Opened,
    HalfOpened,
    Closed,
}

/// A state change applied by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: Instant,
}

impl StateTransition {
    pub fn kind(&self) -> TransitionKind {
        match self.to {
            CircuitState::Open => TransitionKind::Opened,
            CircuitState::HalfOpen => TransitionKind::HalfOpened,
            CircuitState::Closed => TransitionKind::Closed,
        }
    }
}

/// Receives state-change notifications
///
/// Called synchronously after the caller's result is settled. Keep it quick;
/// a panic is caught and logged, never propagated.
///
/// Transitions reach each sink in the order the breaker applied them. Under
/// contention a transition may be delivered on another caller's task, after
/// the caller that caused it has already returned.
pub trait EventSink: Send + Sync {
    fn notify(&self, circuit: &str, transition: &StateTransition);
}

impl<F> EventSink for F
where
    F: Fn(&str, &StateTransition) + Send + Sync,
{
    fn notify(&self, circuit: &str, transition: &StateTransition) {
        self(circuit, transition)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Registered event sinks, in subscription order
#[derive(Default)]
pub struct Observers {
    sinks: RwLock<Vec<(SubscriptionId, Arc<dyn EventSink>)>>,
    next_id: AtomicU64,
    /// Applied but not yet delivered, oldest first
    pending: Mutex<VecDeque<StateTransition>>,
    /// Held by whichever caller is draining `pending`
    delivering: Mutex<()>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, sink));
        id
    }

    /// Returns false if the id was not (or no longer) registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut sinks = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
        let before = sinks.len();
        sinks.retain(|(sid, _)| *sid != id);
        sinks.len() != before
    }

    pub fn len(&self) -> usize {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a transition for ordered delivery
    ///
    /// Call this while still holding the lock the transition was applied
    /// under, then `flush` once that lock is released.
    pub fn enqueue(&self, transition: StateTransition) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(transition);
    }

    /// Deliver queued transitions in order
    ///
    /// Returns at once if another caller is already delivering; that caller
    /// picks up whatever was queued. A sink that triggers a transition from
    /// inside `notify` has it delivered after the current one.
    pub fn flush(&self, circuit: &str) {
        loop {
            let _delivering = match self.delivering.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            while let Some(transition) = self.pop_pending() {
                self.dispatch(circuit, &transition);
            }
            drop(_delivering);

            // Something queued between the last pop and the unlock
            if self.pending_is_empty() {
                return;
            }
        }
    }

    fn pop_pending(&self) -> Option<StateTransition> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn pending_is_empty(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Deliver one transition to every sink
    pub fn dispatch(&self, circuit: &str, transition: &StateTransition) {
        // Snapshot so a sink may (un)subscribe without deadlocking
        let sinks: Vec<Arc<dyn EventSink>> = self
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();

        for sink in sinks {
            let delivered = catch_unwind(AssertUnwindSafe(|| sink.notify(circuit, transition)));
            if delivered.is_err() {
                tracing::error!(
                    circuit,
                    to = %transition.to,
                    "event sink panicked while handling transition"
                );
            }
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("sinks", &self.len())
            .finish()
    }
}
