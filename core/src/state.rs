//! Breaker state machine
//!
//! ```text
//!                      error % >= threshold
//!                      and volume >= minimum
//!     +--------+  ------------------------------>  +------+
//!     | Closed |                                   | Open |
//!     +--------+  <---+                      +---> +------+
//!                     | probe                |        |
//!                     | succeeds      probe fails     | reset_timeout
//!                     |               or times out    | elapsed, first caller
//!                  +----------+  ----------------+    | becomes the probe
//!                  | HalfOpen |  <--------------------+
//!                  +----------+
//! ```
//!
//! The machine is plain data: the breaker holds it under one lock, so every
//! decision and every transition is applied atomically and in order.
//! `may_execute` and `on_outcome` never block.

use crate::callbacks::StateTransition;
use crate::config::BreakerConfig;
use crate::window::{StatsWindow, WindowSnapshot};
use crate::{CircuitState, Outcome, OutcomeKind};
use std::time::Duration;
use tokio::time::Instant;

use state_machines::state_machine;

/// Shared context for every state
#[derive(Debug, Clone, Default)]
pub struct BreakerContext {
    pub name: String,
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: Option<Instant>,
    /// Earliest instant a probe may be admitted
    pub retry_at: Option<Instant>,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub probe_in_flight: bool,
}

state_machine! {
    name: Breaker,
    context: BreakerContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            transition: { from: Open, to: HalfOpen }
        }
        close {
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

/// Permission slip handed out by `may_execute`
///
/// The generation changes on every transition; an outcome carrying an older
/// generation belongs to a superseded state and is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTicket {
    pub probe: bool,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow(CallTicket),
    Reject,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }
}

/// Result of `may_execute`: the decision, plus the Open → HalfOpen
/// transition when this caller became the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub decision: Decision,
    /// State the decision was taken in, after any transition it applied
    pub state: CircuitState,
    pub transition: Option<StateTransition>,
}

/// Circuit breaker state machine with its rolling statistics
pub struct StateMachine {
    context: BreakerContext,
    config: BreakerConfig,
    machine: DynamicBreaker,
    window: StatsWindow,
    generation: u64,
}

impl StateMachine {
    /// Create a closed machine; `config` must already be validated
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::anchored(name, config, Instant::now())
    }

    /// Create a closed machine whose window epochs start at `anchor`
    pub fn anchored(name: impl Into<String>, config: BreakerConfig, anchor: Instant) -> Self {
        let context = BreakerContext { name: name.into() };
        let window = StatsWindow::anchored(
            config.rolling_window,
            config.rolling_window_buckets,
            anchor,
        );

        Self {
            machine: DynamicBreaker::new(context.clone()),
            context,
            config,
            window,
            generation: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        match self.machine.current_state() {
            "Open" => CircuitState::Open,
            "HalfOpen" => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the circuit last opened; `None` unless currently Open
    pub fn opened_at(&self) -> Option<Instant> {
        self.machine.open_data().and_then(|d| d.opened_at)
    }

    /// Earliest instant an Open circuit admits a probe
    pub fn retry_at(&self) -> Option<Instant> {
        self.machine.open_data().and_then(|d| d.retry_at)
    }

    pub fn probe_in_flight(&self) -> bool {
        self.machine
            .half_open_data()
            .map(|d| d.probe_in_flight)
            .unwrap_or(false)
    }

    pub fn snapshot(&self, now: Instant) -> WindowSnapshot {
        self.window.snapshot(now)
    }

    /// Decide whether a call may execute at `now`
    pub fn may_execute(&mut self, now: Instant) -> Admission {
        match self.state() {
            CircuitState::Closed => Admission {
                decision: Decision::Allow(self.ticket(false)),
                state: CircuitState::Closed,
                transition: None,
            },
            CircuitState::Open => {
                let ready = self.retry_at().is_none_or(|retry_at| now >= retry_at);
                if !ready {
                    return self.reject();
                }
                match self.half_open(now) {
                    Some(transition) => Admission {
                        decision: Decision::Allow(self.ticket(true)),
                        state: CircuitState::HalfOpen,
                        transition: Some(transition),
                    },
                    None => self.reject(),
                }
            }
            // The probe is reserved on entry, so every other caller waits it out
            CircuitState::HalfOpen => self.reject(),
        }
    }

    /// Apply the outcome of an admitted call
    pub fn on_outcome(&mut self, ticket: CallTicket, outcome: Outcome) -> Option<StateTransition> {
        if ticket.generation != self.generation {
            tracing::debug!(
                circuit = %self.context.name,
                kind = ?outcome.kind,
                "discarding outcome from a superseded state"
            );
            return None;
        }

        let now = outcome.timestamp;
        match self.state() {
            CircuitState::Closed => {
                self.window.record(outcome.kind, now);
                let snap = self.window.snapshot(now);
                if self.should_trip(&snap) {
                    tracing::warn!(
                        circuit = %self.context.name,
                        volume = snap.volume,
                        error_percentage = snap.error_percentage,
                        "error threshold reached"
                    );
                    self.trip(now)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if ticket.probe => match outcome.kind {
                OutcomeKind::Success => self.close(now),
                OutcomeKind::Failure | OutcomeKind::Timeout => {
                    tracing::warn!(
                        circuit = %self.context.name,
                        kind = ?outcome.kind,
                        "probe failed"
                    );
                    self.trip(now)
                }
            },
            _ => None,
        }
    }

    /// Resolve a call whose caller went away before it completed
    ///
    /// An abandoned probe counts as a failed probe; other calls leave no trace.
    pub fn abandon(&mut self, ticket: CallTicket, now: Instant) -> Option<StateTransition> {
        if !ticket.probe
            || ticket.generation != self.generation
            || self.state() != CircuitState::HalfOpen
        {
            return None;
        }

        tracing::warn!(circuit = %self.context.name, "probe abandoned before completion");
        self.trip(now)
    }

    /// Force the circuit closed with empty statistics
    pub fn reset(&mut self, now: Instant) -> Option<StateTransition> {
        let from = self.state();
        self.machine = DynamicBreaker::new(self.context.clone());
        self.window.reset();
        self.generation += 1;

        if from == CircuitState::Closed {
            return None;
        }
        tracing::info!(circuit = %self.context.name, %from, "circuit manually reset");
        Some(StateTransition {
            from,
            to: CircuitState::Closed,
            at: now,
        })
    }

    fn should_trip(&self, snap: &WindowSnapshot) -> bool {
        snap.errors() > 0
            && snap.volume >= self.config.minimum_volume
            && snap.error_percentage >= self.config.error_threshold_percent
    }

    fn ticket(&self, probe: bool) -> CallTicket {
        CallTicket {
            probe,
            generation: self.generation,
        }
    }

    fn reject(&self) -> Admission {
        Admission {
            decision: Decision::Reject,
            state: self.state(),
            transition: None,
        }
    }

    fn reserve_probe(&mut self) {
        if let Some(data) = self.machine.half_open_data_mut() {
            data.probe_in_flight = true;
        }
    }

    /// Closed/HalfOpen -> Open
    fn trip(&mut self, now: Instant) -> Option<StateTransition> {
        let from = self.state();
        if self.machine.handle(BreakerEvent::Trip).is_err() {
            return None;
        }

        let retry_at = now + self.cooldown();
        if let Some(data) = self.machine.open_data_mut() {
            data.opened_at = Some(now);
            data.retry_at = Some(retry_at);
        }
        self.window.reset();
        self.generation += 1;

        tracing::warn!(
            circuit = %self.context.name,
            %from,
            cooldown_ms = retry_at.saturating_duration_since(now).as_millis() as u64,
            "circuit opened, failing fast"
        );
        Some(StateTransition {
            from,
            to: CircuitState::Open,
            at: now,
        })
    }

    /// Open -> HalfOpen, reserving the probe for the caller
    fn half_open(&mut self, now: Instant) -> Option<StateTransition> {
        if self.machine.handle(BreakerEvent::AttemptReset).is_err() {
            return None;
        }
        self.reserve_probe();
        self.generation += 1;

        tracing::info!(circuit = %self.context.name, "circuit half-open, probing with one call");
        Some(StateTransition {
            from: CircuitState::Open,
            to: CircuitState::HalfOpen,
            at: now,
        })
    }

    /// HalfOpen -> Closed
    fn close(&mut self, now: Instant) -> Option<StateTransition> {
        if self.machine.handle(BreakerEvent::Close).is_err() {
            return None;
        }
        self.window.reset();
        self.generation += 1;

        tracing::info!(circuit = %self.context.name, "circuit closed, calls flowing normally");
        Some(StateTransition {
            from: CircuitState::HalfOpen,
            to: CircuitState::Closed,
            at: now,
        })
    }

    /// Open period: reset_timeout, stretched by up to `reset_jitter` of itself
    fn cooldown(&self) -> Duration {
        let base = self.config.reset_timeout;
        if self.config.reset_jitter <= 0.0 {
            return base;
        }

        let spread_ms = (base.as_secs_f64() * 1000.0 * self.config.reset_jitter) as u64;
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: spread_ms,
            multiplier: 1.0,
            max_delay_ms: spread_ms,
        };
        // Full jitter: uniform in 0..=spread_ms
        let extra_ms = policy.calculate_delay(1, 1.0);
        base + Duration::from_millis(extra_ms as u64)
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.context.name)
            .field("state", &self.state())
            .field("generation", &self.generation)
            .field("config", &self.config)
            .field("window", &self.window)
            .finish()
    }
}
