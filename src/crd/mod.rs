//! Custom Resource Definitions
//!
//! This module contains all CRD definitions used by the operator.

mod scaled_object;

pub use scaled_object::{
    parse_duration, ConditionStatus, PrometheusTriggerMetadata, ScaleHistoryEntry,
    ScaleTargetKind, ScaleTargetRef, ScaleTrigger, ScaledObject, ScaledObjectCondition,
    ScaledObjectPhase, ScaledObjectSpec, ScaledObjectStatus, MAX_SCALE_HISTORY,
    PROMETHEUS_TRIGGER,
};
