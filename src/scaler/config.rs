//! Scaler configuration
//!
//! Everything a reconcile loop needs is passed in at construction through
//! these structs.

use std::time::Duration;

use serde::Serialize;

use super::backoff::BackoffPolicy;
use crate::error::{Error, Result};

// =============================================================================
// Scaler Configuration
// =============================================================================

/// Per-target scaling parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalerConfig {
    /// Metric value one replica is expected to absorb. Must be > 0.
    pub threshold: f64,

    /// Lower replica bound
    pub min_replicas: u32,

    /// Upper replica bound, >= min_replicas
    pub max_replicas: u32,

    /// Time after a scale-up during which scale-down is suppressed
    pub cooldown_period: Duration,

    /// Time between reconcile ticks. Must be > 0.
    pub poll_interval: Duration,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            min_replicas: 0,
            max_replicas: 100,
            cooldown_period: Duration::from_secs(300),
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl ScalerConfig {
    /// Check all invariants, returning `InvalidConfiguration` on the first
    /// violation.
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.threshold)?;

        if self.min_replicas > self.max_replicas {
            return Err(Error::InvalidConfiguration(format!(
                "minReplicas ({}) must not exceed maxReplicas ({})",
                self.min_replicas, self.max_replicas
            )));
        }

        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfiguration(
                "pollInterval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate and return self.
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

/// Threshold must be a positive, finite number.
pub(crate) fn validate_threshold(threshold: f64) -> Result<()> {
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(Error::InvalidConfiguration(format!(
            "threshold must be a positive number, got {}",
            threshold
        )));
    }
    Ok(())
}

// =============================================================================
// Loop Configuration
// =============================================================================

/// Operator-wide knobs shared by every reconcile loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Upper bound for a single metric query
    pub metric_timeout: Duration,

    /// Metric attempts per tick before the tick holds its last desired value
    pub max_metric_attempts: u32,

    /// Delay schedule between metric attempts
    pub backoff: BackoffPolicy,

    /// Log scaling decisions without writing them
    pub dry_run: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            metric_timeout: Duration::from_secs(10),
            max_metric_attempts: 3,
            backoff: BackoffPolicy::default(),
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ScalerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_threshold() {
        for threshold in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = ScalerConfig {
                threshold,
                ..Default::default()
            };
            assert_matches!(config.validate(), Err(Error::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn test_rejects_min_above_max() {
        let config = ScalerConfig {
            min_replicas: 3,
            max_replicas: 2,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("minReplicas (3)"));
    }

    #[test]
    fn test_allows_equal_bounds_and_zero_cooldown() {
        let config = ScalerConfig {
            min_replicas: 2,
            max_replicas: 2,
            cooldown_period: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validated().is_ok());
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let config = ScalerConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_loop_config_default() {
        let config = LoopConfig::default();
        assert_eq!(config.metric_timeout, Duration::from_secs(10));
        assert_eq!(config.max_metric_attempts, 3);
        assert!(!config.dry_run);
    }
}
