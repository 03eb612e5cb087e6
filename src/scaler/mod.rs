//! Scaling core
//!
//! Pure decision logic ([`ScalingPolicy`], [`CooldownGate`]) plus the
//! timer-driven [`ReconcileLoop`] that applies it to one scale target.

pub mod backoff;
pub mod config;
pub mod cooldown;
pub mod policy;
mod proptest;
pub mod reconcile;

pub use backoff::BackoffPolicy;
pub use config::{LoopConfig, ScalerConfig};
pub use cooldown::{CooldownGate, GateDecision, GateState};
pub use policy::{compute, ScalingPolicy};
pub use reconcile::{ReconcileLoop, TickAction, TickOutcome};
