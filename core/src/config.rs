//! Breaker configuration
//!
//! Every threshold is fixed when the breaker is built. Values are validated
//! once here and never clamped.

use crate::errors::InvalidConfig;
use std::time::Duration;

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Duration after which an in-flight call counts as failed
    pub call_timeout: Duration,

    /// Rolling error percentage (0-100) that trips the breaker
    pub error_threshold_percent: f64,

    /// Minimum recorded outcomes before the threshold is evaluated
    pub minimum_volume: u64,

    /// Total span of the rolling statistics window
    pub rolling_window: Duration,

    /// Number of equal slices the rolling window is divided into
    pub rolling_window_buckets: u32,

    /// Time the breaker stays open before allowing a probe
    pub reset_timeout: Duration,

    /// Extra random cooldown on top of reset_timeout (0.0 = none, 1.0 = up to 2x)
    pub reset_jitter: f64,
}

impl BreakerConfig {
    /// Build and validate a configuration with no reset jitter
    pub fn new(
        call_timeout: Duration,
        error_threshold_percent: f64,
        minimum_volume: u64,
        rolling_window: Duration,
        rolling_window_buckets: u32,
        reset_timeout: Duration,
    ) -> Result<Self, InvalidConfig> {
        let config = Self {
            call_timeout,
            error_threshold_percent,
            minimum_volume,
            rolling_window,
            rolling_window_buckets,
            reset_timeout,
            reset_jitter: 0.0,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the reset jitter factor, re-validating the result
    pub fn with_reset_jitter(mut self, jitter: f64) -> Result<Self, InvalidConfig> {
        self.reset_jitter = jitter;
        self.validate()?;
        Ok(self)
    }

    /// Check every field; the first violation wins
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.call_timeout.is_zero() {
            return Err(InvalidConfig::new("call_timeout", "must be greater than zero"));
        }

        if !self.error_threshold_percent.is_finite()
            || !(0.0..=100.0).contains(&self.error_threshold_percent)
        {
            return Err(InvalidConfig::new(
                "error_threshold_percent",
                format!("must be within 0..=100, got {}", self.error_threshold_percent),
            ));
        }

        if self.rolling_window.is_zero() {
            return Err(InvalidConfig::new(
                "rolling_window",
                "must be greater than zero",
            ));
        }

        if self.rolling_window_buckets == 0 {
            return Err(InvalidConfig::new(
                "rolling_window_buckets",
                "must be at least 1",
            ));
        }

        if self.rolling_window.as_nanos() < u128::from(self.rolling_window_buckets) {
            return Err(InvalidConfig::new(
                "rolling_window_buckets",
                format!(
                    "{} buckets do not fit in a {:?} window",
                    self.rolling_window_buckets, self.rolling_window
                ),
            ));
        }

        if self.reset_timeout.is_zero() {
            return Err(InvalidConfig::new(
                "reset_timeout",
                "must be greater than zero",
            ));
        }

        if !self.reset_jitter.is_finite() || !(0.0..=1.0).contains(&self.reset_jitter) {
            return Err(InvalidConfig::new(
                "reset_jitter",
                format!("must be within 0.0..=1.0, got {}", self.reset_jitter),
            ));
        }

        Ok(())
    }

    /// Length of one rolling-window slice
    pub fn bucket_duration(&self) -> Duration {
        self.rolling_window / self.rolling_window_buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> BreakerConfig {
        BreakerConfig::new(
            Duration::from_secs(3),
            50.0,
            4,
            Duration::from_secs(10),
            10,
            Duration::from_secs(10),
        )
        .expect("valid config")
    }

    #[test]
    fn test_valid_config() {
        let config = valid();
        assert_eq!(config.bucket_duration(), Duration::from_secs(1));
        assert_eq!(config.reset_jitter, 0.0);
    }

    #[test]
    fn test_threshold_bounds_are_inclusive() {
        let mut config = valid();
        config.error_threshold_percent = 0.0;
        assert!(config.validate().is_ok());
        config.error_threshold_percent = 100.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = valid();
        config.error_threshold_percent = 100.5;
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "error_threshold_percent");

        config.error_threshold_percent = f64::NAN;
        assert_eq!(
            config.validate().unwrap_err().field,
            "error_threshold_percent"
        );
    }

    #[test]
    fn test_zero_durations_rejected() {
        let err = BreakerConfig::new(
            Duration::ZERO,
            50.0,
            4,
            Duration::from_secs(10),
            10,
            Duration::from_secs(10),
        )
        .unwrap_err();
        assert_eq!(err.field, "call_timeout");

        let mut config = valid();
        config.reset_timeout = Duration::ZERO;
        assert_eq!(config.validate().unwrap_err().field, "reset_timeout");

        let mut config = valid();
        config.rolling_window = Duration::ZERO;
        assert_eq!(config.validate().unwrap_err().field, "rolling_window");
    }

    #[test]
    fn test_bucket_count_rejected() {
        let mut config = valid();
        config.rolling_window_buckets = 0;
        assert_eq!(
            config.validate().unwrap_err().field,
            "rolling_window_buckets"
        );

        config.rolling_window = Duration::from_nanos(5);
        config.rolling_window_buckets = 6;
        assert_eq!(
            config.validate().unwrap_err().field,
            "rolling_window_buckets"
        );
    }

    #[test]
    fn test_reset_jitter_validation() {
        assert!(valid().with_reset_jitter(0.25).is_ok());
        assert_eq!(
            valid().with_reset_jitter(1.5).unwrap_err().field,
            "reset_jitter"
        );
    }
}
