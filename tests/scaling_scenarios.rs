//! End-to-end scaling scenarios
//!
//! Drives reconcile loops through the public API with in-memory metric
//! sources and scale targets:
//! - Burst and drain with cooldown
//! - Idempotent steady state
//! - Metric outages and write conflicts
//! - ScaledObject manifests to running loops

use std::sync::Arc;
use std::time::Duration;

use scaledrive::adapters::{InMemoryEventCollector, InMemoryScaleTarget, StaticMetricSource};
use scaledrive::scaler::{BackoffPolicy, LoopConfig, ReconcileLoop, ScalerConfig, TickAction};
use tokio::time::Instant;

fn fast_loop_config() -> LoopConfig {
    LoopConfig {
        metric_timeout: Duration::from_millis(200),
        max_metric_attempts: 2,
        backoff: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(2)),
        dry_run: false,
    }
}

struct Harness {
    metric: Arc<StaticMetricSource>,
    target: Arc<InMemoryScaleTarget>,
    events: Arc<InMemoryEventCollector>,
    reconcile_loop: ReconcileLoop,
}

fn harness(name: &str, config: ScalerConfig, metric: f64, replicas: u32) -> Harness {
    let metric = Arc::new(StaticMetricSource::new(metric));
    let target = Arc::new(InMemoryScaleTarget::new(
        format!("scenarios/Deployment/{}", name),
        replicas,
    ));
    let events = Arc::new(InMemoryEventCollector::new());
    let reconcile_loop = ReconcileLoop::new(
        config,
        fast_loop_config(),
        metric.clone(),
        target.clone(),
        events.clone(),
    )
    .expect("valid config");

    Harness {
        metric,
        target,
        events,
        reconcile_loop,
    }
}

fn queue_config() -> ScalerConfig {
    ScalerConfig {
        threshold: 10.0,
        min_replicas: 0,
        max_replicas: 10,
        cooldown_period: Duration::from_secs(300),
        poll_interval: Duration::from_secs(30),
    }
}

// =============================================================================
// Burst and drain
// =============================================================================

mod burst_and_drain {
    use super::*;

    #[tokio::test]
    async fn test_queue_burst_then_drain_after_cooldown() {
        let mut h = harness("burst", queue_config(), 0.0, 0);
        let start = Instant::now();

        // Idle queue stays at zero
        let outcome = h.reconcile_loop.tick(start).await;
        assert_eq!(outcome.action, TickAction::NoChange);
        assert_eq!(h.target.replicas(), 0);

        // 250 messages at 10 per replica → capped at 10
        h.metric.set(250.0);
        let outcome = h.reconcile_loop.tick(start + Duration::from_secs(30)).await;
        assert_eq!(outcome.recommended, Some(10));
        assert_eq!(outcome.action, TickAction::Scaled { from: 0, to: 10 });

        // Queue drains, but the scale-up was two ticks ago
        h.metric.set(0.0);
        let outcome = h.reconcile_loop.tick(start + Duration::from_secs(60)).await;
        assert_eq!(
            outcome.action,
            TickAction::Suppressed {
                retained: 10,
                recommended: 0
            }
        );
        assert_eq!(h.target.replicas(), 10);

        let outcome = h.reconcile_loop.tick(start + Duration::from_secs(300)).await;
        assert!(matches!(outcome.action, TickAction::Suppressed { .. }));

        // Cooldown measured from the scale-up at t=30s
        let outcome = h.reconcile_loop.tick(start + Duration::from_secs(331)).await;
        assert_eq!(outcome.action, TickAction::Scaled { from: 10, to: 0 });
        assert_eq!(h.target.write_history(), vec![10, 0]);

        assert_eq!(h.events.events_of_type("ScaledUp").len(), 1);
        assert_eq!(h.events.events_of_type("ScaledDown").len(), 1);
        assert_eq!(h.events.events_of_type("ScaleDownSuppressed").len(), 2);
    }

    #[tokio::test]
    async fn test_scale_up_during_cooldown_extends_it() {
        let mut h = harness("extend", queue_config(), 30.0, 0);
        let start = Instant::now();

        h.reconcile_loop.tick(start).await;
        assert_eq!(h.target.replicas(), 3);

        h.metric.set(55.0);
        h.reconcile_loop.tick(start + Duration::from_secs(200)).await;
        assert_eq!(h.target.replicas(), 6);

        // 300s after the first scale-up but only 150s after the second
        h.metric.set(0.0);
        let outcome = h.reconcile_loop.tick(start + Duration::from_secs(350)).await;
        assert!(matches!(outcome.action, TickAction::Suppressed { retained: 6, .. }));

        let outcome = h.reconcile_loop.tick(start + Duration::from_secs(501)).await;
        assert_eq!(outcome.action, TickAction::Scaled { from: 6, to: 0 });
    }

    #[tokio::test]
    async fn test_partial_drain_is_also_held() {
        let mut h = harness("partial", queue_config(), 80.0, 2);
        let start = Instant::now();

        h.reconcile_loop.tick(start).await;
        assert_eq!(h.target.replicas(), 8);

        h.metric.set(35.0);
        let outcome = h.reconcile_loop.tick(start + Duration::from_secs(10)).await;
        assert_eq!(
            outcome.action,
            TickAction::Suppressed {
                retained: 8,
                recommended: 4
            }
        );
    }
}

// =============================================================================
// Steady state
// =============================================================================

mod steady_state {
    use super::*;

    #[tokio::test]
    async fn test_repeated_ticks_write_once() {
        let mut h = harness("steady", queue_config(), 42.0, 0);
        let start = Instant::now();

        for i in 0..5 {
            h.reconcile_loop
                .tick(start + Duration::from_secs(30 * i))
                .await;
        }

        assert_eq!(h.target.replicas(), 5);
        assert_eq!(h.target.write_count(), 1);
    }

    #[tokio::test]
    async fn test_min_replicas_floor_with_empty_queue() {
        let config = ScalerConfig {
            min_replicas: 2,
            ..queue_config()
        };
        let mut h = harness("floor", config, 0.0, 0);

        let outcome = h.reconcile_loop.tick(Instant::now()).await;
        assert_eq!(outcome.action, TickAction::Scaled { from: 0, to: 2 });
    }

    #[tokio::test]
    async fn test_external_change_is_reconciled() {
        let mut h = harness("drift", queue_config(), 40.0, 0);
        let start = Instant::now();

        h.reconcile_loop.tick(start).await;
        assert_eq!(h.target.replicas(), 4);

        // Someone scales the deployment by hand
        h.target.set_external(9);
        let outcome = h.reconcile_loop.tick(start + Duration::from_secs(30)).await;

        // Observed 9 > recommended 4, and we are inside the cooldown
        assert_eq!(
            outcome.action,
            TickAction::Suppressed {
                retained: 9,
                recommended: 4
            }
        );
    }

    #[tokio::test]
    async fn test_dry_run_never_writes() {
        let metric = Arc::new(StaticMetricSource::new(100.0));
        let target = Arc::new(InMemoryScaleTarget::new("scenarios/StatefulSet/dry", 1));
        let events = Arc::new(InMemoryEventCollector::new());
        let mut reconcile_loop = ReconcileLoop::new(
            queue_config(),
            LoopConfig {
                dry_run: true,
                ..fast_loop_config()
            },
            metric,
            target.clone(),
            events.clone(),
        )
        .unwrap();

        let outcome = reconcile_loop.tick(Instant::now()).await;
        assert_eq!(outcome.action, TickAction::DryRun { from: 1, to: 10 });
        assert_eq!(target.write_count(), 0);
        assert!(events.events_of_type("ScaledUp").is_empty());
    }
}

// =============================================================================
// Failure handling
// =============================================================================

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_metric_outage_holds_replicas() {
        let mut h = harness("outage", queue_config(), 60.0, 0);
        let start = Instant::now();

        h.reconcile_loop.tick(start).await;
        assert_eq!(h.target.replicas(), 6);

        // Every attempt of the next two ticks fails
        h.metric.fail_next(4);
        for i in 1..=2 {
            let outcome = h.reconcile_loop.tick(start + Duration::from_secs(30 * i)).await;
            assert_eq!(outcome.metric_value, None);
            assert_eq!(outcome.action, TickAction::NoChange);
            assert_eq!(h.target.replicas(), 6);
        }
        assert_eq!(h.events.events_of_type("MetricUnavailable").len(), 2);

        // Recovery picks up where it left off
        h.metric.set(20.0);
        let outcome = h.reconcile_loop.tick(start + Duration::from_secs(400)).await;
        assert_eq!(outcome.action, TickAction::Scaled { from: 6, to: 2 });
    }

    #[tokio::test]
    async fn test_outage_before_first_sample_skips() {
        let mut h = harness("cold", queue_config(), 60.0, 3);

        h.metric.fail_next(2);
        let outcome = h.reconcile_loop.tick(Instant::now()).await;
        assert_eq!(outcome.action, TickAction::Skipped);
        assert_eq!(h.target.replicas(), 3);
        assert_eq!(h.target.write_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_recovered_within_tick() {
        let mut h = harness("flaky", queue_config(), 15.0, 0);

        h.metric.fail_next(1);
        let outcome = h.reconcile_loop.tick(Instant::now()).await;
        assert_eq!(outcome.action, TickAction::Scaled { from: 0, to: 2 });
        assert_eq!(h.metric.calls(), 2);
        assert!(h.events.events_of_type("MetricUnavailable").is_empty());
    }

    #[tokio::test]
    async fn test_slow_metric_times_out() {
        let mut h = harness("slow", queue_config(), 15.0, 0);
        h.metric.set_delay(Duration::from_secs(5));

        let outcome = h.reconcile_loop.tick(Instant::now()).await;
        assert_eq!(outcome.action, TickAction::Skipped);
        assert_eq!(h.events.events_of_type("MetricUnavailable").len(), 1);
    }

    #[tokio::test]
    async fn test_conflicts_are_deferred_then_applied() {
        let mut h = harness("conflict", queue_config(), 30.0, 0);
        let start = Instant::now();

        h.target.conflict_next(2);
        let outcome = h.reconcile_loop.tick(start).await;
        assert_eq!(outcome.action, TickAction::ConflictDeferred { desired: 3 });
        assert_eq!(h.target.replicas(), 0);

        let outcome = h.reconcile_loop.tick(start + Duration::from_secs(30)).await;
        assert_eq!(outcome.action, TickAction::Scaled { from: 0, to: 3 });
    }
}

// =============================================================================
// Manifests
// =============================================================================

mod manifests {
    use super::*;
    use scaledrive::crd::ScaledObject;
    use tokio_test::{assert_err, assert_ok};

    const MANIFEST: &str = r#"
apiVersion: autoscaling.scaledrive.io/v1alpha1
kind: ScaledObject
metadata:
  name: order-processor
  namespace: shop
spec:
  scaleTargetRef:
    name: order-processor
  minReplicaCount: 1
  maxReplicaCount: 20
  cooldownPeriod: 2m
  pollingInterval: 15s
  triggers:
    - type: prometheus
      metadata:
        serverAddress: http://prometheus.monitoring:9090
        query: 'sum(rabbitmq_queue_messages{queue="orders"})'
        threshold: "25"
"#;

    #[tokio::test]
    async fn test_manifest_drives_a_loop() {
        let so: ScaledObject = serde_yaml::from_str(MANIFEST).unwrap();
        let config = assert_ok!(so.scaler_config());
        assert_eq!(config.cooldown_period, Duration::from_secs(120));
        assert_eq!(config.poll_interval, Duration::from_secs(15));

        let mut h = harness("order-processor", config, 260.0, 1);
        let outcome = h.reconcile_loop.tick(Instant::now()).await;
        assert_eq!(outcome.action, TickAction::Scaled { from: 1, to: 11 });
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let manifest = MANIFEST.replace(r#"threshold: "25""#, r#"threshold: "0""#);
        let so: ScaledObject = serde_yaml::from_str(&manifest).unwrap();
        let err = assert_err!(so.scaler_config());
        assert!(err.is_fatal_configuration());
    }
}
