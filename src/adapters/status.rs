//! ScaledObject status recorder
//!
//! An `EventPublisher` that folds domain events into the owning
//! ScaledObject's status and merge-patches it.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use parking_lot::Mutex;
use serde_json::json;
use tracing::debug;

use crate::crd::{
    ConditionStatus, ScaleHistoryEntry, ScaledObject, ScaledObjectCondition, ScaledObjectPhase,
    ScaledObjectStatus,
};
use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Field manager for status patches
pub const FIELD_MANAGER: &str = "scaledrive";

/// Writes loop outcomes to `ScaledObject.status`
pub struct ScaledObjectStatusRecorder {
    api: Api<ScaledObject>,
    name: String,
    status: Mutex<ScaledObjectStatus>,
}

impl ScaledObjectStatusRecorder {
    /// Start from the object's current status so history is preserved.
    pub fn new(client: Client, scaled_object: &ScaledObject) -> Self {
        let namespace = scaled_object
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        Self {
            api: Api::namespaced(client, &namespace),
            name: scaled_object.metadata.name.clone().unwrap_or_default(),
            status: Mutex::new(scaled_object.status.clone().unwrap_or_default()),
        }
    }
}

impl std::fmt::Debug for ScaledObjectStatusRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScaledObjectStatusRecorder")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl EventPublisher for ScaledObjectStatusRecorder {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let snapshot = {
            let mut status = self.status.lock();
            if !apply_event(&mut status, &event) {
                return Ok(());
            }
            status.clone()
        };

        self.api
            .patch_status(
                &self.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&json!({ "status": snapshot })),
            )
            .await?;

        debug!(name = %self.name, event_type = event.event_type(), "Patched status");
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

/// Fold an event into a status. Returns whether anything changed.
pub fn apply_event(status: &mut ScaledObjectStatus, event: &DomainEvent) -> bool {
    match event {
        DomainEvent::ScaledUp {
            from,
            to,
            metric_value,
            timestamp,
            ..
        }
        | DomainEvent::ScaledDown {
            from,
            to,
            metric_value,
            timestamp,
            ..
        } => {
            status.add_scale_event(ScaleHistoryEntry::new(*from, *to, *metric_value, *timestamp));
            status.desired_replicas = Some(*to);
            if metric_value.is_some() {
                status.last_metric_value = *metric_value;
            }
            status.set_condition(ScaledObjectCondition::ready(
                ConditionStatus::True,
                "Scaling",
                format!("scaled from {} to {} replicas", from, to),
            ));
            true
        }
        DomainEvent::ScaleDownSuppressed {
            current,
            recommended,
            ..
        } => {
            let changed = status.desired_replicas != Some(*current)
                || status.current_replicas != Some(*current);
            status.desired_replicas = Some(*current);
            status.current_replicas = Some(*current);
            if changed {
                debug!("Holding {} replicas, {} recommended", current, recommended);
            }
            changed
        }
        DomainEvent::MetricUnavailable { reason, .. } => {
            let already = status.conditions.iter().any(|c| {
                c.r#type == "Ready"
                    && c.status == ConditionStatus::False
                    && c.reason.as_deref() == Some("MetricUnavailable")
            });
            status.set_condition(ScaledObjectCondition::ready(
                ConditionStatus::False,
                "MetricUnavailable",
                reason.clone(),
            ));
            !already
        }
        DomainEvent::LoopStarted { .. } => {
            status.phase = ScaledObjectPhase::Active;
            status.set_condition(ScaledObjectCondition::ready(
                ConditionStatus::True,
                "LoopRunning",
                "reconcile loop started",
            ));
            true
        }
        DomainEvent::WriteConflictDeferred { .. }
        | DomainEvent::ScaleWriteFailed { .. }
        | DomainEvent::LoopStopped { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ready(status: &ScaledObjectStatus) -> &ScaledObjectCondition {
        status
            .conditions
            .iter()
            .find(|c| c.r#type == "Ready")
            .expect("Ready condition")
    }

    #[test]
    fn test_scale_events_recorded() {
        let mut status = ScaledObjectStatus::default();

        assert!(apply_event(
            &mut status,
            &DomainEvent::scaled("jobs/Deployment/worker", 0, 2, Some(10.0))
        ));
        assert_eq!(status.current_replicas, Some(2));
        assert_eq!(status.desired_replicas, Some(2));
        assert_eq!(status.last_metric_value, Some(10.0));
        assert!(status.last_scale_up_time.is_some());
        assert_eq!(ready(&status).status, ConditionStatus::True);

        apply_event(
            &mut status,
            &DomainEvent::scaled("jobs/Deployment/worker", 2, 0, None),
        );
        assert_eq!(status.scale_history.len(), 2);
        assert_eq!(status.last_metric_value, Some(10.0));
    }

    #[test]
    fn test_repeated_metric_outage_patches_once() {
        let mut status = ScaledObjectStatus::default();
        let outage = DomainEvent::MetricUnavailable {
            target: "t".to_string(),
            attempts: 3,
            reason: "connection refused".to_string(),
            held_replicas: Some(2),
            timestamp: Utc::now(),
        };

        assert!(apply_event(&mut status, &outage));
        assert!(!apply_event(&mut status, &outage));
        assert_eq!(ready(&status).reason.as_deref(), Some("MetricUnavailable"));
    }

    #[test]
    fn test_suppression_only_patches_on_change() {
        let mut status = ScaledObjectStatus::default();
        let suppressed = DomainEvent::ScaleDownSuppressed {
            target: "t".to_string(),
            current: 2,
            recommended: 0,
            remaining_ms: 30_000,
            timestamp: Utc::now(),
        };

        assert!(apply_event(&mut status, &suppressed));
        assert!(!apply_event(&mut status, &suppressed));
    }

    #[test]
    fn test_loop_started_activates() {
        let mut status = ScaledObjectStatus::default();
        assert!(apply_event(&mut status, &DomainEvent::loop_started("t")));
        assert_eq!(status.phase, ScaledObjectPhase::Active);
        assert!(!apply_event(&mut status, &DomainEvent::loop_stopped("t")));
    }
}
