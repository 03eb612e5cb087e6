//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the abstractions the scaling core depends on.
//! Infrastructure adapters implement these traits to provide concrete
//! metric sources and scale targets.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │   MetricSource │ ScaleTarget │ EventPublisher        │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │ PrometheusMetricSource │ KubeScaleTarget │ Recorder  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::events::DomainEvent;
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// A single reading of an external signal.
///
/// Produced by a [`MetricSource`] on demand and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    /// Observed value (e.g. number of visible queue messages)
    pub value: f64,
    /// When the value was observed
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// Create a sample observed now.
    pub fn new(value: f64) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
        }
    }

    /// Create a sample with an explicit observation time.
    pub fn at(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }
}

/// Replica bookkeeping for a single scale target.
///
/// Only the reconcile loop's write step mutates `desired_replicas`;
/// `min_replicas <= desired_replicas <= max_replicas` holds at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScalingTarget {
    pub current_replicas: u32,
    pub desired_replicas: u32,
    pub min_replicas: u32,
    pub max_replicas: u32,
}

impl ScalingTarget {
    /// Create a target with no observations yet.
    pub fn new(min_replicas: u32, max_replicas: u32) -> Self {
        Self {
            current_replicas: min_replicas,
            desired_replicas: min_replicas,
            min_replicas,
            max_replicas,
        }
    }

    /// Clamp a replica count into this target's bounds.
    pub fn clamp(&self, replicas: u32) -> u32 {
        replicas.clamp(self.min_replicas, self.max_replicas)
    }

    /// Whether a write is needed to converge.
    pub fn needs_write(&self) -> bool {
        self.current_replicas != self.desired_replicas
    }
}

// =============================================================================
// Metric Source Port
// =============================================================================

/// Port for reading the external signal that drives scaling.
///
/// Implementations may block on network I/O; callers bound every call
/// with a timeout.
///
/// # Example
///
/// ```ignore
/// struct QueueDepth { /* ... */ }
///
/// #[async_trait]
/// impl MetricSource for QueueDepth {
///     async fn get_value(&self) -> Result<MetricSample> {
///         // Ask the broker for the visible message count
///     }
/// }
/// ```
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Read the current value of the signal.
    async fn get_value(&self) -> Result<MetricSample>;

    /// Short human-readable description, used in logs and events.
    fn describe(&self) -> String {
        "metric".to_string()
    }
}

// =============================================================================
// Scale Target Port
// =============================================================================

/// Port for reading and writing the replica count of a workload.
#[async_trait]
pub trait ScaleTarget: Send + Sync {
    /// Observe the live replica count.
    async fn get_replicas(&self) -> Result<u32>;

    /// Request a replica count.
    ///
    /// Returns [`crate::error::Error::WriteConflict`] when the target changed
    /// since it was last observed.
    async fn set_replicas(&self, replicas: u32) -> Result<()>;

    /// Stable identifier, e.g. `namespace/Deployment/name`.
    fn id(&self) -> String;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()>;
}
