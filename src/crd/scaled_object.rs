//! ScaledObject Custom Resource Definition
//!
//! Declares which workload to scale, within which replica bounds, and on
//! which external signal.

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::scaler::ScalerConfig;

/// Maximum number of scale events kept in status
pub const MAX_SCALE_HISTORY: usize = 50;

/// Only supported trigger type
pub const PROMETHEUS_TRIGGER: &str = "prometheus";

// =============================================================================
// ScaledObject CRD
// =============================================================================

/// ScaledObject binds a Deployment or StatefulSet to an external metric.
///
/// For every ScaledObject the operator runs a reconcile loop that:
/// 1. Queries the trigger's PromQL expression every `pollingInterval`
/// 2. Converts the value to replicas (`ceil(value / threshold)`, clamped)
/// 3. Holds scale-down back for `cooldownPeriod` after a scale-up
/// 4. Writes the result to the target's `scale` subresource
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "autoscaling.scaledrive.io",
    version = "v1alpha1",
    kind = "ScaledObject",
    plural = "scaledobjects",
    shortname = "so",
    status = "ScaledObjectStatus",
    printcolumn = r#"{"name": "Target", "type": "string", "jsonPath": ".spec.scaleTargetRef.name"}"#,
    printcolumn = r#"{"name": "Min", "type": "integer", "jsonPath": ".spec.minReplicaCount"}"#,
    printcolumn = r#"{"name": "Max", "type": "integer", "jsonPath": ".spec.maxReplicaCount"}"#,
    printcolumn = r#"{"name": "Desired", "type": "integer", "jsonPath": ".status.desiredReplicas"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ScaledObjectSpec {
    /// Workload whose replica count is managed. Must live in the same
    /// namespace as the ScaledObject.
    pub scale_target_ref: ScaleTargetRef,

    /// Lower replica bound. 0 allows scaling to zero.
    #[serde(default)]
    pub min_replica_count: u32,

    /// Upper replica bound.
    #[serde(default = "default_max_replicas")]
    pub max_replica_count: u32,

    /// Time after a scale-up during which scale-down is suppressed.
    /// Go-style duration ("5m", "90s"). "0" disables the cooldown.
    #[serde(default = "default_cooldown_period")]
    pub cooldown_period: String,

    /// Time between metric reads. Go-style duration, must be > 0.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: String,

    /// Metric triggers. Exactly one is used.
    pub triggers: Vec<ScaleTrigger>,

    /// Master switch. A disabled ScaledObject leaves replicas untouched.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Log scaling decisions without writing them.
    #[serde(default)]
    pub dry_run: bool,
}

/// Reference to the scaled workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScaleTargetRef {
    pub name: String,

    #[serde(default)]
    pub kind: ScaleTargetKind,
}

/// Workload kinds exposing a `scale` subresource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ScaleTargetKind {
    #[default]
    Deployment,
    StatefulSet,
}

impl std::fmt::Display for ScaleTargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleTargetKind::Deployment => write!(f, "Deployment"),
            ScaleTargetKind::StatefulSet => write!(f, "StatefulSet"),
        }
    }
}

/// A metric trigger
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScaleTrigger {
    /// Trigger type; only "prometheus" is understood.
    pub r#type: String,

    pub metadata: PrometheusTriggerMetadata,
}

/// Settings for a Prometheus trigger
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusTriggerMetadata {
    /// Prometheus base URL. Falls back to the operator's `--prometheus-url`.
    #[serde(default)]
    pub server_address: Option<String>,

    /// Instant PromQL query returning a single series
    pub query: String,

    /// Metric value one replica absorbs, as a decimal string ("1", "2.5")
    pub threshold: String,
}

// =============================================================================
// Status
// =============================================================================

/// Observed state of the ScaledObject
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScaledObjectStatus {
    #[serde(default)]
    pub phase: ScaledObjectPhase,

    /// Generation the running loop was built from
    #[serde(default)]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub current_replicas: Option<u32>,

    #[serde(default)]
    pub desired_replicas: Option<u32>,

    #[serde(default)]
    pub last_metric_value: Option<f64>,

    #[serde(default)]
    pub last_scale_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_scale_up_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub conditions: Vec<ScaledObjectCondition>,

    /// Recent scale events, newest first (last 50)
    #[serde(default)]
    pub scale_history: Vec<ScaleHistoryEntry>,
}

/// ScaledObject lifecycle phase
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ScaledObjectPhase {
    #[default]
    Pending,
    Active,
    Disabled,
    Error,
}

impl std::fmt::Display for ScaledObjectPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaledObjectPhase::Pending => write!(f, "Pending"),
            ScaledObjectPhase::Active => write!(f, "Active"),
            ScaledObjectPhase::Disabled => write!(f, "Disabled"),
            ScaledObjectPhase::Error => write!(f, "Error"),
        }
    }
}

/// Condition for ScaledObject status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScaledObjectCondition {
    /// Type of condition
    pub r#type: String,

    /// Status: True, False, or Unknown
    pub status: ConditionStatus,

    #[serde(default)]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl ScaledObjectCondition {
    /// The `Ready` condition
    pub fn ready(status: ConditionStatus, reason: &str, message: impl Into<String>) -> Self {
        Self {
            r#type: "Ready".to_string(),
            status,
            last_transition_time: Some(Utc::now()),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }
}

/// Condition status values
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Record of a replica write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScaleHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub from_replicas: u32,
    pub to_replicas: u32,

    /// Metric value that drove the write, if one was read this tick
    #[serde(default)]
    pub metric_value: Option<f64>,
}

impl ScaleHistoryEntry {
    pub fn new(
        from_replicas: u32,
        to_replicas: u32,
        metric_value: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            from_replicas,
            to_replicas,
            metric_value,
        }
    }

    pub fn is_scale_up(&self) -> bool {
        self.to_replicas > self.from_replicas
    }
}

// =============================================================================
// Default Values
// =============================================================================

fn default_max_replicas() -> u32 {
    100
}

fn default_cooldown_period() -> String {
    "5m".to_string()
}

fn default_polling_interval() -> String {
    "30s".to_string()
}

fn default_enabled() -> bool {
    true
}

// =============================================================================
// Implementations
// =============================================================================

impl ScaledObject {
    pub fn is_enabled(&self) -> bool {
        self.spec.enabled
    }

    pub fn is_dry_run(&self) -> bool {
        self.spec.dry_run
    }

    /// Stable identifier of the scaled workload: `namespace/Kind/name`
    pub fn target_id(&self) -> String {
        format!(
            "{}/{}/{}",
            self.namespace().unwrap_or_else(|| "default".to_string()),
            self.spec.scale_target_ref.kind,
            self.spec.scale_target_ref.name
        )
    }

    pub fn cooldown_period(&self) -> Result<Duration> {
        parse_duration(&self.spec.cooldown_period)
    }

    pub fn polling_interval(&self) -> Result<Duration> {
        parse_duration(&self.spec.polling_interval)
    }

    /// The Prometheus trigger driving this object.
    pub fn trigger(&self) -> Result<&ScaleTrigger> {
        match self.spec.triggers.as_slice() {
            [] => Err(Error::InvalidConfiguration(
                "at least one trigger is required".to_string(),
            )),
            [trigger] if trigger.r#type == PROMETHEUS_TRIGGER => {
                if trigger.metadata.query.trim().is_empty() {
                    return Err(Error::InvalidConfiguration(
                        "trigger query must not be empty".to_string(),
                    ));
                }
                Ok(trigger)
            }
            [trigger] => Err(Error::InvalidConfiguration(format!(
                "unsupported trigger type '{}'",
                trigger.r#type
            ))),
            many => Err(Error::InvalidConfiguration(format!(
                "exactly one trigger is supported, got {}",
                many.len()
            ))),
        }
    }

    /// Parse the trigger threshold
    pub fn threshold(&self) -> Result<f64> {
        let raw = &self.trigger()?.metadata.threshold;
        raw.trim().parse::<f64>().map_err(|_| {
            Error::InvalidConfiguration(format!("threshold '{}' is not a number", raw))
        })
    }

    /// Build and validate the scaler configuration.
    pub fn scaler_config(&self) -> Result<ScalerConfig> {
        ScalerConfig {
            threshold: self.threshold()?,
            min_replicas: self.spec.min_replica_count,
            max_replicas: self.spec.max_replica_count,
            cooldown_period: self.cooldown_period()?,
            poll_interval: self.polling_interval()?,
        }
        .validated()
    }
}

impl ScaledObjectStatus {
    /// Update a condition, creating it if it doesn't exist
    pub fn set_condition(&mut self, condition: ScaledObjectCondition) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            // Keep the transition time when the status did not change
            if existing.status == condition.status {
                let since = existing.last_transition_time;
                *existing = condition;
                existing.last_transition_time = since.or(existing.last_transition_time);
            } else {
                *existing = condition;
            }
        } else {
            self.conditions.push(condition);
        }
    }

    /// Record a replica write, maintaining max 50 entries
    pub fn add_scale_event(&mut self, entry: ScaleHistoryEntry) {
        self.last_scale_time = Some(entry.timestamp);
        if entry.is_scale_up() {
            self.last_scale_up_time = Some(entry.timestamp);
        }
        self.current_replicas = Some(entry.to_replicas);
        self.scale_history.insert(0, entry);
        self.scale_history.truncate(MAX_SCALE_HISTORY);
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a Go-style duration string (e.g., "1h30m", "90s", "1.5m", "500ms").
///
/// Units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`, plus `d` for days. Each
/// component may be fractional. A bare number is read as seconds. Zero is
/// allowed.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let overflow = || Error::DurationParse(format!("duration overflows: {}", s));
    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(Error::DurationParse(format!(
                "missing number in duration: {}",
                s
            )));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = rest[..unit_len].to_lowercase();
        rest = &rest[unit_len..];

        let secs_per_unit = match unit.as_str() {
            "" | "s" => 1.0,
            "ms" => 1e-3,
            "us" | "µs" => 1e-6,
            "ns" => 1e-9,
            "m" => 60.0,
            "h" => 3600.0,
            "d" => 86400.0,
            other => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    other
                )))
            }
        };

        let part = Duration::try_from_secs_f64(value * secs_per_unit).map_err(|_| overflow())?;
        total = total.checked_add(part).ok_or_else(overflow)?;
    }

    Ok(total)
}
