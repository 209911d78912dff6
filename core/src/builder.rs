//! Builder API for circuit breaker configuration
//!
//! The six core thresholds have no defaults; `build` fails with
//! `InvalidConfig` naming the first one left unset.

use crate::{
    bulkhead::BulkheadSemaphore,
    callbacks::{EventSink, StateTransition, TransitionKind},
    circuit::CircuitBreaker,
    classifier::FailureClassifier,
    config::BreakerConfig,
    errors::InvalidConfig,
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    call_timeout: Option<Duration>,
    error_threshold_percent: Option<f64>,
    minimum_volume: Option<u64>,
    rolling_window: Option<Duration>,
    rolling_window_buckets: Option<u32>,
    reset_timeout: Option<Duration>,
    reset_jitter: f64,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    max_concurrency: Option<usize>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            call_timeout: None,
            error_threshold_percent: None,
            minimum_volume: None,
            rolling_window: None,
            rolling_window_buckets: None,
            reset_timeout: None,
            reset_jitter: 0.0,
            failure_classifier: None,
            max_concurrency: None,
            sinks: Vec::new(),
        }
    }

    /// Take every threshold from an existing config
    pub fn config(mut self, config: BreakerConfig) -> Self {
        self.call_timeout = Some(config.call_timeout);
        self.error_threshold_percent = Some(config.error_threshold_percent);
        self.minimum_volume = Some(config.minimum_volume);
        self.rolling_window = Some(config.rolling_window);
        self.rolling_window_buckets = Some(config.rolling_window_buckets);
        self.reset_timeout = Some(config.reset_timeout);
        self.reset_jitter = config.reset_jitter;
        self
    }

    /// Deadline after which an in-flight call counts as a timeout
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Rolling error percentage (0-100) that trips the circuit
    pub fn error_threshold_percent(mut self, percent: f64) -> Self {
        self.error_threshold_percent = Some(percent);
        self
    }

    /// Outcomes required in the window before the threshold is checked
    pub fn minimum_volume(mut self, volume: u64) -> Self {
        self.minimum_volume = Some(volume);
        self
    }

    pub fn rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window = Some(window);
        self
    }

    pub fn rolling_window_buckets(mut self, buckets: u32) -> Self {
        self.rolling_window_buckets = Some(buckets);
        self
    }

    /// How long the circuit stays open before a probe is allowed
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = Some(timeout);
        self
    }

    /// Stretch each open period by a random 0..=factor share of reset_timeout
    pub fn reset_jitter(mut self, factor: f64) -> Self {
        self.reset_jitter = factor;
        self
    }

    /// Decide which operation errors count against the dependency
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use std::time::Duration;
    /// use tripwire::{CircuitBreaker, PredicateClassifier};
    ///
    /// let breaker = CircuitBreaker::builder("api")
    ///     .call_timeout(Duration::from_secs(1))
    ///     .error_threshold_percent(50.0)
    ///     .minimum_volume(10)
    ///     .rolling_window(Duration::from_secs(10))
    ///     .rolling_window_buckets(10)
    ///     .reset_timeout(Duration::from_secs(30))
    ///     // Only slow errors count
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         ctx.duration > Duration::from_millis(500)
    ///     })))
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Reject calls once `limit` are already executing
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Register an observer for every transition
    pub fn observer(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(self, f: F) -> Self
    where
        F: Fn(&str, &StateTransition) + Send + Sync + 'static,
    {
        self.on(TransitionKind::Opened, f)
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(self, f: F) -> Self
    where
        F: Fn(&str, &StateTransition) + Send + Sync + 'static,
    {
        self.on(TransitionKind::Closed, f)
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(self, f: F) -> Self
    where
        F: Fn(&str, &StateTransition) + Send + Sync + 'static,
    {
        self.on(TransitionKind::HalfOpened, f)
    }

    fn on<F>(self, kind: TransitionKind, f: F) -> Self
    where
        F: Fn(&str, &StateTransition) + Send + Sync + 'static,
    {
        self.observer(Arc::new(move |name: &str, transition: &StateTransition| {
            if transition.kind() == kind {
                f(name, transition);
            }
        }))
    }

    /// Validate and build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, InvalidConfig> {
        let config = BreakerConfig::new(
            self.call_timeout
                .ok_or_else(|| InvalidConfig::missing("call_timeout"))?,
            self.error_threshold_percent
                .ok_or_else(|| InvalidConfig::missing("error_threshold_percent"))?,
            self.minimum_volume
                .ok_or_else(|| InvalidConfig::missing("minimum_volume"))?,
            self.rolling_window
                .ok_or_else(|| InvalidConfig::missing("rolling_window"))?,
            self.rolling_window_buckets
                .ok_or_else(|| InvalidConfig::missing("rolling_window_buckets"))?,
            self.reset_timeout
                .ok_or_else(|| InvalidConfig::missing("reset_timeout"))?,
        )?
        .with_reset_jitter(self.reset_jitter)?;

        let bulkhead = self
            .max_concurrency
            .map(BulkheadSemaphore::new)
            .transpose()?;

        let breaker =
            CircuitBreaker::from_parts(self.name, config, self.failure_classifier, bulkhead);
        for sink in self.sinks {
            breaker.subscribe(sink);
        }
        Ok(breaker)
    }
}

impl std::fmt::Debug for CircuitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBuilder")
            .field("name", &self.name)
            .field("call_timeout", &self.call_timeout)
            .field("error_threshold_percent", &self.error_threshold_percent)
            .field("minimum_volume", &self.minimum_volume)
            .field("rolling_window", &self.rolling_window)
            .field("rolling_window_buckets", &self.rolling_window_buckets)
            .field("reset_timeout", &self.reset_timeout)
            .field("reset_jitter", &self.reset_jitter)
            .field("max_concurrency", &self.max_concurrency)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
