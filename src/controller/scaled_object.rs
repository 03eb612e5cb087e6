//! ScaledObject Controller
//!
//! Turns ScaledObjects into running reconcile loops. The controller never
//! scales anything itself: it validates the object, builds the adapters and
//! hands them to a [`ReconcileLoop`] running in its own task.

use crate::adapters::{
    CompositeEventPublisher, KubeScaleTarget, LoggingEventPublisher, PrometheusMetricSource,
    ScaledObjectStatusRecorder, FIELD_MANAGER,
};
use crate::crd::{ConditionStatus, ScaledObject, ScaledObjectCondition, ScaledObjectPhase};
use crate::error::{Error, Result};
use crate::metrics::{MetricsConfig, MetricsWatcher};
use crate::scaler::{LoopConfig, ReconcileLoop};

use super::registry::LoopRegistry;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Finalizer guarding loop teardown
pub const FINALIZER: &str = "autoscaling.scaledrive.io/cleanup";

/// Resync period for healthy objects
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Shared context for the controller
pub struct ControllerContext {
    /// Kubernetes client
    pub client: Client,

    /// Knobs shared by every loop
    pub loop_config: LoopConfig,

    /// Prometheus settings; `prometheus_url` is the fallback server
    pub metrics_config: MetricsConfig,

    /// One watcher per Prometheus server
    watchers: DashMap<String, Arc<MetricsWatcher>>,

    /// Running loops
    pub loops: LoopRegistry,
}

impl ControllerContext {
    /// Create a new controller context
    pub fn new(client: Client, loop_config: LoopConfig, metrics_config: MetricsConfig) -> Arc<Self> {
        Arc::new(Self {
            client,
            loop_config,
            metrics_config,
            watchers: DashMap::new(),
            loops: LoopRegistry::new(),
        })
    }

    /// Watcher for `server`, created on first use.
    pub fn watcher_for(&self, server: &str) -> Result<Arc<MetricsWatcher>> {
        if let Some(watcher) = self.watchers.get(server) {
            return Ok(watcher.clone());
        }
        let watcher = MetricsWatcher::new(self.metrics_config.with_url(server))?;
        Ok(self
            .watchers
            .entry(server.to_string())
            .or_insert(watcher)
            .clone())
    }

    /// Whether every known Prometheus server answered its last request.
    pub fn metric_sources_healthy(&self) -> bool {
        self.watchers.iter().all(|w| w.is_healthy())
    }
}

impl std::fmt::Debug for ControllerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerContext")
            .field("loop_config", &self.loop_config)
            .field("metrics_config", &self.metrics_config)
            .field("loops", &self.loops)
            .finish()
    }
}

/// Run the ScaledObject controller until a shutdown signal arrives.
pub async fn run(ctx: Arc<ControllerContext>) -> Result<()> {
    let scaled_objects: Api<ScaledObject> = Api::all(ctx.client.clone());

    // Check if CRD exists
    if let Err(e) = scaled_objects.list(&ListParams::default().limit(1)).await {
        error!(
            "ScaledObject CRD not found: {}. Install it with `scaledrive --print-crd | kubectl apply -f -`.",
            e
        );
        return Err(Error::Kube(e));
    }

    info!("Starting ScaledObject controller");

    Controller::new(scaled_objects, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!("Reconciled {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("Stopping {} reconcile loop(s)", ctx.loops.len());
    ctx.loops.shutdown().await;

    info!("Controller shutdown complete");
    Ok(())
}

/// Reconcile a ScaledObject resource
#[instrument(skip(so, ctx), fields(scaled_object = %so.name_any()))]
async fn reconcile(so: Arc<ScaledObject>, ctx: Arc<ControllerContext>) -> Result<Action> {
    let namespace = so.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<ScaledObject> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, FINALIZER, so, |event| async {
        match event {
            FinalizerEvent::Apply(so) => apply(so, &api, &ctx).await,
            FinalizerEvent::Cleanup(so) => cleanup(so, &ctx).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

/// Key for the loop registry
fn loop_key(so: &ScaledObject) -> String {
    so.uid()
        .unwrap_or_else(|| format!("{}/{}", so.namespace().unwrap_or_default(), so.name_any()))
}

async fn apply(
    so: Arc<ScaledObject>,
    api: &Api<ScaledObject>,
    ctx: &ControllerContext,
) -> Result<Action> {
    let name = so.name_any();
    let key = loop_key(&so);
    let generation = so.metadata.generation;

    if !so.is_enabled() {
        if ctx.loops.stop(&key).await {
            info!("ScaledObject {} disabled, loop stopped", name);
        }
        patch_phase(
            api,
            &name,
            ScaledObjectPhase::Disabled,
            generation,
            ScaledObjectCondition::ready(ConditionStatus::False, "Disabled", "spec.enabled is false"),
        )
        .await;
        return Ok(Action::await_change());
    }

    let built = build_loop(&so, ctx);
    let reconcile_loop = match built {
        Ok(Some(reconcile_loop)) => reconcile_loop,
        Ok(None) => return Ok(Action::requeue(RESYNC_INTERVAL)),
        Err(e) if e.is_fatal_configuration() => {
            warn!("ScaledObject {} is invalid: {}", name, e);
            ctx.loops.stop(&key).await;
            patch_phase(
                api,
                &name,
                ScaledObjectPhase::Error,
                generation,
                ScaledObjectCondition::ready(
                    ConditionStatus::False,
                    "InvalidConfiguration",
                    e.to_string(),
                ),
            )
            .await;
            // Fixed by editing the object, which triggers a new reconcile
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e),
    };

    ctx.loops.start(&key, generation, reconcile_loop).await;
    patch_phase(
        api,
        &name,
        ScaledObjectPhase::Active,
        generation,
        ScaledObjectCondition::ready(ConditionStatus::True, "LoopRunning", "reconcile loop started"),
    )
    .await;

    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Build a loop for `so`, or `None` when one for this generation is running.
fn build_loop(so: &ScaledObject, ctx: &ControllerContext) -> Result<Option<ReconcileLoop>> {
    let config = so.scaler_config()?;
    let key = loop_key(so);
    if ctx.loops.is_current(&key, so.metadata.generation) {
        return Ok(None);
    }

    let trigger = so.trigger()?;
    let server = trigger
        .metadata
        .server_address
        .clone()
        .unwrap_or_else(|| ctx.metrics_config.prometheus_url.clone());
    let watcher = ctx.watcher_for(&server)?;
    let metric = Arc::new(PrometheusMetricSource::new(
        watcher,
        trigger.metadata.query.clone(),
    ));

    let namespace = so.namespace().unwrap_or_else(|| "default".to_string());
    let target = Arc::new(KubeScaleTarget::new(
        ctx.client.clone(),
        &namespace,
        so.spec.scale_target_ref.clone(),
    ));

    let events = Arc::new(
        CompositeEventPublisher::new()
            .with_publisher(LoggingEventPublisher::info_level())
            .with_publisher(ScaledObjectStatusRecorder::new(ctx.client.clone(), so)),
    );

    let loop_config = LoopConfig {
        dry_run: ctx.loop_config.dry_run || so.is_dry_run(),
        ..ctx.loop_config.clone()
    };

    info!(
        "Building loop for {} → {} (threshold {}, replicas {}..={})",
        so.name_any(),
        so.target_id(),
        config.threshold,
        config.min_replicas,
        config.max_replicas
    );

    let reconcile_loop = ReconcileLoop::new(config, loop_config, metric, target, events)?;
    Ok(Some(match last_scale_up(so) {
        Some(at) => reconcile_loop.resume_cooldown(at),
        None => reconcile_loop,
    }))
}

/// Last scale-up recorded in status by an earlier loop for this object.
fn last_scale_up(so: &ScaledObject) -> Option<DateTime<Utc>> {
    so.status.as_ref().and_then(|s| s.last_scale_up_time)
}

async fn cleanup(so: Arc<ScaledObject>, ctx: &ControllerContext) -> Result<Action> {
    let key = loop_key(&so);
    if ctx.loops.stop(&key).await {
        info!("ScaledObject {} deleted, loop stopped", so.name_any());
    }
    Ok(Action::await_change())
}

async fn patch_phase(
    api: &Api<ScaledObject>,
    name: &str,
    phase: ScaledObjectPhase,
    generation: Option<i64>,
    condition: ScaledObjectCondition,
) {
    let patch = json!({
        "status": {
            "phase": phase,
            "observedGeneration": generation,
            "conditions": [condition],
        }
    });

    if let Err(e) = api
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
    {
        warn!("Failed to update status of {}: {}", name, e);
    }
}

/// Error policy for the controller
fn error_policy(_so: Arc<ScaledObject>, error: &Error, _ctx: Arc<ControllerContext>) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(Duration::from_secs(60))
}

// =============================================================================
// Tests
// =============================================================================
