//! Controller module
//!
//! Watches ScaledObject resources and keeps one reconcile loop running per
//! enabled, valid object.

mod registry;
mod scaled_object;

pub use registry::LoopRegistry;
pub use scaled_object::{run, ControllerContext, FINALIZER};
