//! Domain Events
//!
//! Immutable records of what the reconcile loops decided and did.
//! Events feed the log, the ScaledObject status and tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain event representing a significant occurrence in a scaling loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    // =========================================================================
    // Loop Lifecycle
    // =========================================================================
    /// A reconcile loop started serving a target.
    LoopStarted {
        target: String,
        timestamp: DateTime<Utc>,
    },

    /// A reconcile loop stopped.
    LoopStopped {
        target: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Scaling
    // =========================================================================
    /// Replicas were increased.
    ScaledUp {
        target: String,
        from: u32,
        to: u32,
        metric_value: Option<f64>,
        timestamp: DateTime<Utc>,
    },

    /// Replicas were decreased.
    ScaledDown {
        target: String,
        from: u32,
        to: u32,
        metric_value: Option<f64>,
        timestamp: DateTime<Utc>,
    },

    /// A scale-down was held back by the cooldown.
    ScaleDownSuppressed {
        target: String,
        current: u32,
        recommended: u32,
        remaining_ms: u64,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Failures
    // =========================================================================
    /// The metric source failed on every attempt of a tick.
    MetricUnavailable {
        target: String,
        attempts: u32,
        reason: String,
        held_replicas: Option<u32>,
        timestamp: DateTime<Utc>,
    },

    /// The write conflicted twice and was deferred to the next tick.
    WriteConflictDeferred {
        target: String,
        desired: u32,
        timestamp: DateTime<Utc>,
    },

    /// The write failed for a reason other than a conflict.
    ScaleWriteFailed {
        target: String,
        desired: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The event's variant name.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::LoopStarted { .. } => "LoopStarted",
            DomainEvent::LoopStopped { .. } => "LoopStopped",
            DomainEvent::ScaledUp { .. } => "ScaledUp",
            DomainEvent::ScaledDown { .. } => "ScaledDown",
            DomainEvent::ScaleDownSuppressed { .. } => "ScaleDownSuppressed",
            DomainEvent::MetricUnavailable { .. } => "MetricUnavailable",
            DomainEvent::WriteConflictDeferred { .. } => "WriteConflictDeferred",
            DomainEvent::ScaleWriteFailed { .. } => "ScaleWriteFailed",
        }
    }

    /// The target this event concerns.
    pub fn target(&self) -> &str {
        match self {
            DomainEvent::LoopStarted { target, .. }
            | DomainEvent::LoopStopped { target, .. }
            | DomainEvent::ScaledUp { target, .. }
            | DomainEvent::ScaledDown { target, .. }
            | DomainEvent::ScaleDownSuppressed { target, .. }
            | DomainEvent::MetricUnavailable { target, .. }
            | DomainEvent::WriteConflictDeferred { target, .. }
            | DomainEvent::ScaleWriteFailed { target, .. } => target,
        }
    }

    /// When the event occurred.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::LoopStarted { timestamp, .. }
            | DomainEvent::LoopStopped { timestamp, .. }
            | DomainEvent::ScaledUp { timestamp, .. }
            | DomainEvent::ScaledDown { timestamp, .. }
            | DomainEvent::ScaleDownSuppressed { timestamp, .. }
            | DomainEvent::MetricUnavailable { timestamp, .. }
            | DomainEvent::WriteConflictDeferred { timestamp, .. }
            | DomainEvent::ScaleWriteFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Build a ScaledUp or ScaledDown event depending on direction.
    pub fn scaled(target: &str, from: u32, to: u32, metric_value: Option<f64>) -> Self {
        let target = target.to_string();
        let timestamp = Utc::now();
        if to > from {
            DomainEvent::ScaledUp {
                target,
                from,
                to,
                metric_value,
                timestamp,
            }
        } else {
            DomainEvent::ScaledDown {
                target,
                from,
                to,
                metric_value,
                timestamp,
            }
        }
    }

    pub fn loop_started(target: &str) -> Self {
        DomainEvent::LoopStarted {
            target: target.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn loop_stopped(target: &str) -> Self {
        DomainEvent::LoopStopped {
            target: target.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_picks_direction() {
        let up = DomainEvent::scaled("ns/Deployment/app", 0, 2, Some(10.0));
        assert_eq!(up.event_type(), "ScaledUp");

        let down = DomainEvent::scaled("ns/Deployment/app", 2, 0, Some(0.0));
        assert_eq!(down.event_type(), "ScaledDown");
        assert_eq!(down.target(), "ns/Deployment/app");
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = DomainEvent::loop_started("ns/Deployment/app");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"LoopStarted\""));
        assert!(json.contains("\"target\":\"ns/Deployment/app\""));
    }

    #[test]
    fn test_event_roundtrips() {
        let event = DomainEvent::ScaleDownSuppressed {
            target: "t".into(),
            current: 2,
            recommended: 0,
            remaining_ms: 30_000,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
