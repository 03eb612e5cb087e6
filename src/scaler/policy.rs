//! Scaling Policy
//!
//! Maps a metric reading to a replica count:
//!
//! ```text
//! metric == 0  → min
//! otherwise    → clamp(ceil(metric / threshold), min, max)
//! ```

use super::config::{validate_threshold, ScalerConfig};
use crate::error::{Error, Result};

/// Compute the desired replica count for a metric reading.
///
/// Negative and non-finite readings count as zero.
pub fn compute(metric_value: f64, threshold: f64, min: u32, max: u32) -> Result<u32> {
    validate_threshold(threshold)?;
    if min > max {
        return Err(Error::InvalidConfiguration(format!(
            "minReplicas ({}) must not exceed maxReplicas ({})",
            min, max
        )));
    }

    if !metric_value.is_finite() || metric_value <= 0.0 {
        return Ok(min);
    }

    let ratio = (metric_value / threshold).ceil();
    let desired = if ratio >= max as f64 {
        max
    } else {
        ratio as u32
    };

    Ok(desired.clamp(min, max))
}

/// A validated policy bound to one target's threshold and replica range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingPolicy {
    threshold: f64,
    min: u32,
    max: u32,
}

impl ScalingPolicy {
    pub fn new(threshold: f64, min: u32, max: u32) -> Result<Self> {
        // Validates the parameters once so `recommend` cannot fail.
        compute(0.0, threshold, min, max)?;
        Ok(Self {
            threshold,
            min,
            max,
        })
    }

    pub fn from_config(config: &ScalerConfig) -> Result<Self> {
        Self::new(config.threshold, config.min_replicas, config.max_replicas)
    }

    /// Recommended replicas for a metric reading.
    pub fn recommend(&self, metric_value: f64) -> u32 {
        compute(metric_value, self.threshold, self.min, self.max).unwrap_or(self.min)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn bounds(&self) -> (u32, u32) {
        (self.min, self.max)
    }
}
