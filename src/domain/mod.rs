//! Domain Layer
//!
//! Core abstractions the scaling engine is written against.
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for metric sources, scale
//!   targets and event sinks
//! - **Events** (`events.rs`) - Domain events emitted by reconcile loops
//!
//! # Usage
//!
//! ```ignore
//! use scaledrive::domain::ports::{MetricSource, ScaleTarget};
//!
//! async fn observe<M, T>(metric: &M, target: &T) -> Result<(f64, u32)>
//! where
//!     M: MetricSource,
//!     T: ScaleTarget,
//! {
//!     let sample = metric.get_value().await?;
//!     let replicas = target.get_replicas().await?;
//!     Ok((sample.value, replicas))
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::DomainEvent;
pub use ports::{EventPublisher, MetricSample, MetricSource, ScaleTarget, ScalingTarget};
