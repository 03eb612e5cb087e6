//! scaledrive - External-Metric Autoscaler Operator
//!
//! A Kubernetes operator that scales Deployments and StatefulSets on an
//! external signal such as queue depth, read from Prometheus.
//!
//! # Architecture
//!
//! Each `ScaledObject` gets its own reconcile loop following the
//! "Eyes, Brain, Hands" pattern:
//!
//! ```text
//! MetricSource (Eyes) → ScalingPolicy + CooldownGate (Brain) → ScaleTarget (Hands)
//! ```
//!
//! - [`scaler::compute`] maps a metric to replicas: `ceil(metric / threshold)`
//!   clamped to `[min, max]`, with a zero metric giving `min`.
//! - [`scaler::CooldownGate`] holds scale-down back for a cooldown period
//!   after every scale-up.
//! - [`scaler::ReconcileLoop`] samples, decides and writes once per polling
//!   interval until cancelled.
//!
//! # Modules
//!
//! - [`adapters`] - Infrastructure adapters implementing domain ports
//! - [`controller`] - ScaledObject controller and loop registry
//! - [`crd`] - Custom Resource Definitions for Kubernetes
//! - [`domain`] - Domain layer with ports and events
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus queries and operator self-metrics
//! - [`scaler`] - Scaling policy, cooldown gate and reconcile loop

pub mod adapters;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod scaler;

// Re-export commonly used types
pub use crd::{ScaledObject, ScaledObjectSpec, ScaledObjectStatus};
pub use domain::{DomainEvent, EventPublisher, MetricSample, MetricSource, ScaleTarget};
pub use error::{Error, Result};
pub use metrics::MetricsWatcher;
pub use scaler::{CooldownGate, LoopConfig, ReconcileLoop, ScalerConfig, ScalingPolicy};
