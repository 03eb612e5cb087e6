//! Infrastructure Adapters
//!
//! Implementations of the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │      MetricSource │ ScaleTarget │ EventPublisher            │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ PrometheusMetricSource │ KubeScaleTarget                    │ │
//! │  │ ScaledObjectStatusRecorder │ LoggingEventPublisher          │ │
//! │  │ StaticMetricSource │ InMemoryScaleTarget                    │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use scaledrive::adapters::{PrometheusMetricSource, KubeScaleTarget};
//! use scaledrive::domain::ports::MetricSource;
//!
//! let source = PrometheusMetricSource::new(watcher, "sum(queue_depth)");
//! let sample = source.get_value().await?;
//! ```

mod event_publisher;
mod kubernetes;
mod memory;
mod prometheus;
mod status;

pub use event_publisher::{CompositeEventPublisher, InMemoryEventCollector, LoggingEventPublisher};
pub use kubernetes::KubeScaleTarget;
pub use memory::{InMemoryScaleTarget, StaticMetricSource};
pub use prometheus::PrometheusMetricSource;
pub use status::{apply_event, ScaledObjectStatusRecorder, FIELD_MANAGER};
