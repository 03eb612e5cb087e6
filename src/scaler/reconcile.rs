//! Reconcile Loop - "The Brain"
//!
//! One loop drives one scale target. Each tick:
//!
//! 1. Observe the live replica count
//! 2. Sample the metric (timeout + capped exponential backoff)
//! 3. Policy → cooldown gate → desired replicas
//! 4. Write when desired differs from current
//!
//! No error leaves a tick. Metric outages hold the last desired value,
//! write conflicts are retried once and otherwise deferred, and anything
//! else is reconciled on the next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::config::{LoopConfig, ScalerConfig};
use super::cooldown::{CooldownGate, GateDecision};
use super::policy::ScalingPolicy;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{EventPublisher, MetricSample, MetricSource, ScaleTarget, ScalingTarget};
use crate::error::{Error, Result};
use crate::metrics::operator;

// =============================================================================
// Tick Outcome
// =============================================================================

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickAction {
    /// Current already equals desired
    NoChange,
    /// Replicas were written
    Scaled { from: u32, to: u32 },
    /// Dry-run: a write would have been issued
    DryRun { from: u32, to: u32 },
    /// Scale-down held back by the cooldown
    Suppressed { retained: u32, recommended: u32 },
    /// Two consecutive write conflicts; retried next tick
    ConflictDeferred { desired: u32 },
    /// Write failed for another reason; retried next tick
    WriteFailed { desired: u32 },
    /// No metric yet and nothing to hold
    Skipped,
    /// The loop was cancelled before anything was written
    Cancelled,
}

/// Summary of a tick, mostly for logs and tests
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub metric_value: Option<f64>,
    pub recommended: Option<u32>,
    pub desired: u32,
    pub current: u32,
    pub action: TickAction,
}

// =============================================================================
// Reconcile Loop
// =============================================================================

/// Timer-driven reconciliation of one scale target
pub struct ReconcileLoop {
    config: ScalerConfig,
    loop_config: LoopConfig,
    policy: ScalingPolicy,
    gate: CooldownGate,
    state: ScalingTarget,
    metric: Arc<dyn MetricSource>,
    target: Arc<dyn ScaleTarget>,
    events: Arc<dyn EventPublisher>,
    target_id: String,
    last_sample: Option<MetricSample>,
    held_desired: Option<u32>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ReconcileLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileLoop")
            .field("target", &self.target_id)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

impl ReconcileLoop {
    /// Create a loop. Fails only on invalid configuration.
    pub fn new(
        config: ScalerConfig,
        loop_config: LoopConfig,
        metric: Arc<dyn MetricSource>,
        target: Arc<dyn ScaleTarget>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        config.validate()?;
        let policy = ScalingPolicy::from_config(&config)?;
        let gate = CooldownGate::new(config.cooldown_period);
        let state = ScalingTarget::new(config.min_replicas, config.max_replicas);
        let target_id = target.id();

        Ok(Self {
            config,
            loop_config,
            policy,
            gate,
            state,
            metric,
            target,
            events,
            target_id,
            last_sample: None,
            held_desired: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Resume the cooldown of a scale-up made at `last_scale_up`, typically
    /// by an earlier loop for the same object.
    pub fn resume_cooldown(mut self, last_scale_up: DateTime<Utc>) -> Self {
        let elapsed = (Utc::now() - last_scale_up)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.gate.restore(elapsed, Instant::now());
        self
    }

    pub fn state(&self) -> ScalingTarget {
        self.state
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }

    pub fn last_sample(&self) -> Option<&MetricSample> {
        self.last_sample.as_ref()
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Tick every poll interval until cancelled.
    ///
    /// A cancelled loop issues no further writes, including from a tick
    /// that is in flight.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.cancel = cancel.clone();

        info!(
            target_ref = %self.target_id,
            metric = %self.metric.describe(),
            poll_interval = ?self.config.poll_interval,
            "Starting reconcile loop"
        );
        self.emit(DomainEvent::loop_started(&self.target_id)).await;

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let outcome = self.tick(Instant::now()).await;
                    debug!(target_ref = %self.target_id, ?outcome, "Tick complete");
                }
            }
        }

        self.emit(DomainEvent::loop_stopped(&self.target_id)).await;
        info!(target_ref = %self.target_id, "Reconcile loop stopped");
    }

    /// Run one reconciliation pass at `now`.
    #[instrument(skip(self), fields(target_ref = %self.target_id))]
    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        operator::RECONCILE_TOTAL
            .with_label_values(&[self.target_id.as_str()])
            .inc();

        // Observed state wins over the optimistic value
        match self.target.get_replicas().await {
            Ok(observed) => self.state.current_replicas = observed,
            Err(e) => warn!(
                "Failed to observe replicas for {}, using last known {}: {}",
                self.target_id, self.state.current_replicas, e
            ),
        }
        let current = self.state.current_replicas;

        let cancel = self.cancel.clone();
        let desired_before = self.state.desired_replicas;
        let (sampled, attempts) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return TickOutcome {
                    metric_value: None,
                    recommended: None,
                    desired: desired_before,
                    current,
                    action: TickAction::Cancelled,
                };
            }
            sampled = self.sample_metric() => sampled,
        };
        let (metric_value, recommended) = match sampled {
            Ok(sample) => {
                let recommended = self.policy.recommend(sample.value);
                operator::METRIC_VALUE
                    .with_label_values(&[self.target_id.as_str()])
                    .set(sample.value);
                debug!(
                    "Metric {} = {} → recommend {} replicas",
                    self.metric.describe(),
                    sample.value,
                    recommended
                );
                let value = sample.value;
                self.last_sample = Some(sample);
                (Some(value), Some(recommended))
            }
            Err(e) => {
                operator::METRIC_ERRORS_TOTAL
                    .with_label_values(&[self.target_id.as_str()])
                    .inc();
                warn!(
                    "Metric unavailable for {} after {} attempt(s), holding {:?}: {}",
                    self.target_id, attempts, self.held_desired, e
                );
                self.emit(DomainEvent::MetricUnavailable {
                    target: self.target_id.clone(),
                    attempts,
                    reason: e.to_string(),
                    held_replicas: self.held_desired,
                    timestamp: Utc::now(),
                })
                .await;
                (None, None)
            }
        };

        let candidate = match recommended.or(self.held_desired) {
            Some(c) => c,
            None => {
                return TickOutcome {
                    metric_value,
                    recommended,
                    desired: self.state.desired_replicas,
                    current,
                    action: TickAction::Skipped,
                };
            }
        };

        let decision = self.gate.evaluate(current, candidate, now);
        let desired = self.state.clamp(decision.replicas());
        self.state.desired_replicas = desired;
        self.held_desired = Some(desired);
        operator::DESIRED_REPLICAS
            .with_label_values(&[self.target_id.as_str()])
            .set(desired as i64);

        if let GateDecision::Suppressed {
            recommended,
            remaining,
            ..
        } = decision
        {
            operator::SUPPRESSED_SCALE_DOWNS_TOTAL
                .with_label_values(&[self.target_id.as_str()])
                .inc();
            debug!(
                "Scale-down of {} to {} suppressed, cooldown ends in {:?}",
                self.target_id, recommended, remaining
            );
            self.emit(DomainEvent::ScaleDownSuppressed {
                target: self.target_id.clone(),
                current,
                recommended,
                remaining_ms: remaining.as_millis() as u64,
                timestamp: Utc::now(),
            })
            .await;
        }

        let action = if desired == current {
            match decision {
                GateDecision::Suppressed { recommended, .. } => TickAction::Suppressed {
                    retained: desired,
                    recommended,
                },
                GateDecision::Apply(_) => TickAction::NoChange,
            }
        } else {
            self.write(desired, metric_value).await
        };

        TickOutcome {
            metric_value,
            recommended,
            desired,
            current: self.state.current_replicas,
            action,
        }
    }

    /// Query the metric source, retrying transient failures.
    ///
    /// Returns the result and the number of attempts made.
    async fn sample_metric(&self) -> (Result<MetricSample>, u32) {
        let max_attempts = self.loop_config.max_metric_attempts.max(1);
        let mut last_err = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                sleep(self.loop_config.backoff.delay(attempt - 1)).await;
            }

            match timeout(self.loop_config.metric_timeout, self.metric.get_value()).await {
                Ok(Ok(sample)) => return (Ok(sample), attempt + 1),
                Ok(Err(e)) if !e.is_transient() => return (Err(e), attempt + 1),
                Ok(Err(e)) => {
                    debug!("Metric attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(e);
                }
                Err(_) => {
                    debug!(
                        "Metric attempt {} timed out after {:?}",
                        attempt + 1,
                        self.loop_config.metric_timeout
                    );
                    last_err = Some(Error::MetricTimeout(self.loop_config.metric_timeout));
                }
            }
        }

        let err = last_err
            .unwrap_or_else(|| Error::Internal("metric source was never queried".to_string()));
        (Err(err), max_attempts)
    }

    /// Write `desired`, re-reading and retrying once on conflict.
    async fn write(&mut self, desired: u32, metric_value: Option<f64>) -> TickAction {
        let from = self.state.current_replicas;

        if self.loop_config.dry_run {
            info!(
                "[DRY-RUN] Would scale {} from {} to {} replicas",
                self.target_id, from, desired
            );
            return TickAction::DryRun { from, to: desired };
        }

        if self.cancel.is_cancelled() {
            return TickAction::Cancelled;
        }

        match self.target.set_replicas(desired).await {
            Ok(()) => self.written(desired, metric_value).await,
            Err(Error::WriteConflict { .. }) => {
                debug!("Write conflict on {}, re-reading", self.target_id);
                match self.target.get_replicas().await {
                    Ok(observed) => {
                        self.state.current_replicas = observed;
                        if observed == desired {
                            return TickAction::NoChange;
                        }
                    }
                    Err(e) => warn!("Re-read after conflict failed: {}", e),
                }
                if self.cancel.is_cancelled() {
                    return TickAction::Cancelled;
                }

                match self.target.set_replicas(desired).await {
                    Ok(()) => self.written(desired, metric_value).await,
                    Err(Error::WriteConflict { .. }) => {
                        self.count_write(from, desired, "conflict");
                        warn!(
                            "Write to {} conflicted twice, deferring to next tick",
                            self.target_id
                        );
                        self.emit(DomainEvent::WriteConflictDeferred {
                            target: self.target_id.clone(),
                            desired,
                            timestamp: Utc::now(),
                        })
                        .await;
                        TickAction::ConflictDeferred { desired }
                    }
                    Err(e) => self.write_failed(from, desired, e).await,
                }
            }
            Err(e) => self.write_failed(from, desired, e).await,
        }
    }

    async fn written(&mut self, desired: u32, metric_value: Option<f64>) -> TickAction {
        let from = self.state.current_replicas;
        self.state.current_replicas = desired;
        self.count_write(from, desired, "success");
        info!(
            "Scaled {} from {} to {} replicas (metric: {:?})",
            self.target_id, from, desired, metric_value
        );
        self.emit(DomainEvent::scaled(&self.target_id, from, desired, metric_value))
            .await;
        TickAction::Scaled { from, to: desired }
    }

    async fn write_failed(&mut self, from: u32, desired: u32, e: Error) -> TickAction {
        self.count_write(from, desired, "error");
        warn!(
            "Failed to scale {} to {} replicas: {}",
            self.target_id, desired, e
        );
        self.emit(DomainEvent::ScaleWriteFailed {
            target: self.target_id.clone(),
            desired,
            reason: e.to_string(),
            timestamp: Utc::now(),
        })
        .await;
        TickAction::WriteFailed { desired }
    }

    fn count_write(&self, from: u32, to: u32, outcome: &str) {
        let direction = if to > from { "up" } else { "down" };
        operator::SCALING_WRITES_TOTAL
            .with_label_values(&[self.target_id.as_str(), direction, outcome])
            .inc();
    }

    async fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish event for {}: {}", self.target_id, e);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEventCollector, InMemoryScaleTarget, StaticMetricSource};
    use crate::scaler::backoff::BackoffPolicy;

    struct Harness {
        metric: Arc<StaticMetricSource>,
        target: Arc<InMemoryScaleTarget>,
        events: Arc<InMemoryEventCollector>,
        lp: ReconcileLoop,
    }

    fn fast_loop_config() -> LoopConfig {
        LoopConfig {
            metric_timeout: Duration::from_millis(50),
            max_metric_attempts: 3,
            backoff: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(2)),
            dry_run: false,
        }
    }

    fn harness(name: &str, config: ScalerConfig, loop_config: LoopConfig) -> Harness {
        let metric = Arc::new(StaticMetricSource::new(0.0));
        let target = Arc::new(InMemoryScaleTarget::new(name, 0));
        let events = Arc::new(InMemoryEventCollector::new());
        let lp = ReconcileLoop::new(
            config,
            loop_config,
            metric.clone(),
            target.clone(),
            events.clone(),
        )
        .unwrap();
        Harness {
            metric,
            target,
            events,
            lp,
        }
    }

    fn queue_config() -> ScalerConfig {
        ScalerConfig {
            threshold: 1.0,
            min_replicas: 0,
            max_replicas: 2,
            cooldown_period: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ScalerConfig {
            threshold: -1.0,
            ..Default::default()
        };
        let result = ReconcileLoop::new(
            config,
            LoopConfig::default(),
            Arc::new(StaticMetricSource::new(0.0)),
            Arc::new(InMemoryScaleTarget::new("unit/invalid", 0)),
            Arc::new(InMemoryEventCollector::new()),
        );
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_scale_up_clamped_to_max() {
        let mut h = harness("unit/scale-up", queue_config(), fast_loop_config());
        h.metric.set(10.0);

        let outcome = h.lp.tick(Instant::now()).await;

        assert_eq!(outcome.recommended, Some(2));
        assert_eq!(outcome.action, TickAction::Scaled { from: 0, to: 2 });
        assert_eq!(h.target.replicas(), 2);
        assert_eq!(h.events.events_of_type("ScaledUp").len(), 1);
    }

    #[tokio::test]
    async fn test_scale_down_suppressed_then_applied() {
        let mut h = harness("unit/cooldown", queue_config(), fast_loop_config());
        let t0 = Instant::now();

        h.metric.set(10.0);
        h.lp.tick(t0).await;

        h.metric.set(0.0);
        let held = h.lp.tick(t0 + Duration::from_secs(30)).await;
        assert_eq!(
            held.action,
            TickAction::Suppressed {
                retained: 2,
                recommended: 0
            }
        );
        assert_eq!(h.target.replicas(), 2);
        assert_eq!(h.events.events_of_type("ScaleDownSuppressed").len(), 1);

        let applied = h.lp.tick(t0 + Duration::from_secs(61)).await;
        assert_eq!(applied.action, TickAction::Scaled { from: 2, to: 0 });
        assert_eq!(h.target.replicas(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_metric_issues_no_extra_writes() {
        let mut h = harness("unit/idempotent", queue_config(), fast_loop_config());
        h.metric.set(1.0);
        let t0 = Instant::now();

        h.lp.tick(t0).await;
        for i in 1..5 {
            let outcome = h.lp.tick(t0 + Duration::from_secs(i)).await;
            assert_eq!(outcome.action, TickAction::NoChange);
        }

        assert_eq!(h.target.write_count(), 1);
    }

    #[tokio::test]
    async fn test_metric_failure_holds_last_desired() {
        let mut h = harness("unit/hold", queue_config(), fast_loop_config());
        let t0 = Instant::now();
        h.metric.set(10.0);
        h.lp.tick(t0).await;

        h.metric.fail_next(100);
        let outcome = h
            .lp
            .tick(t0 + Duration::from_secs(120))
            .await;

        assert_eq!(outcome.metric_value, None);
        assert_eq!(outcome.desired, 2);
        assert_eq!(outcome.action, TickAction::NoChange);
        assert_eq!(h.metric.calls(), 1 + 3);

        let unavailable = h.events.events_of_type("MetricUnavailable");
        assert_eq!(unavailable.len(), 1);
        match &unavailable[0] {
            DomainEvent::MetricUnavailable {
                attempts,
                held_replicas,
                ..
            } => {
                assert_eq!(*attempts, 3);
                assert_eq!(*held_replicas, Some(2));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_tick() {
        let mut h = harness("unit/retry", queue_config(), fast_loop_config());
        h.metric.set(1.0);
        h.metric.fail_next(2);

        let outcome = h.lp.tick(Instant::now()).await;

        assert_eq!(outcome.metric_value, Some(1.0));
        assert_eq!(outcome.action, TickAction::Scaled { from: 0, to: 1 });
        assert!(h.events.events_of_type("MetricUnavailable").is_empty());
    }

    #[tokio::test]
    async fn test_first_tick_without_metric_is_skipped() {
        let mut h = harness("unit/skip", queue_config(), fast_loop_config());
        h.metric.fail_next(100);

        let outcome = h.lp.tick(Instant::now()).await;

        assert_eq!(outcome.action, TickAction::Skipped);
        assert_eq!(h.target.write_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_metric_is_a_timeout_not_zero() {
        let mut h = harness("unit/timeout", queue_config(), fast_loop_config());
        let t0 = Instant::now();
        h.metric.set(2.0);
        h.lp.tick(t0).await;
        assert_eq!(h.target.replicas(), 2);

        h.metric.set(0.0);
        h.metric.set_delay(Duration::from_millis(200));
        let outcome = h.lp.tick(t0 + Duration::from_secs(300)).await;

        // A zero reading would scale to 0 now that the cooldown is over
        assert_eq!(outcome.metric_value, None);
        assert_eq!(h.target.replicas(), 2);
    }

    #[tokio::test]
    async fn test_single_conflict_is_retried() {
        let mut h = harness("unit/conflict-once", queue_config(), fast_loop_config());
        h.metric.set(2.0);
        h.target.conflict_next(1);

        let outcome = h.lp.tick(Instant::now()).await;

        assert_eq!(outcome.action, TickAction::Scaled { from: 0, to: 2 });
        assert_eq!(h.target.replicas(), 2);
    }

    #[tokio::test]
    async fn test_repeated_conflict_is_deferred() {
        let mut h = harness("unit/conflict-twice", queue_config(), fast_loop_config());
        h.metric.set(2.0);
        h.target.conflict_next(2);
        let t0 = Instant::now();

        let outcome = h.lp.tick(t0).await;
        assert_eq!(outcome.action, TickAction::ConflictDeferred { desired: 2 });
        assert_eq!(h.target.replicas(), 0);
        assert_eq!(h.events.events_of_type("WriteConflictDeferred").len(), 1);

        let next = h.lp.tick(t0 + Duration::from_secs(1)).await;
        assert_eq!(next.action, TickAction::Scaled { from: 0, to: 2 });
    }

    #[tokio::test]
    async fn test_failed_write_reconciled_next_tick() {
        let mut h = harness("unit/write-fail", queue_config(), fast_loop_config());
        h.metric.set(1.0);
        h.target.fail_writes(1);
        let t0 = Instant::now();

        let outcome = h.lp.tick(t0).await;
        assert_eq!(outcome.action, TickAction::WriteFailed { desired: 1 });
        assert_eq!(h.lp.state().current_replicas, 0);

        let next = h.lp.tick(t0 + Duration::from_secs(1)).await;
        assert_eq!(next.action, TickAction::Scaled { from: 0, to: 1 });
    }

    #[tokio::test]
    async fn test_external_change_is_corrected() {
        let mut h = harness("unit/external", queue_config(), fast_loop_config());
        h.metric.set(1.0);
        let t0 = Instant::now();
        h.lp.tick(t0).await;

        h.target.set_external(2);
        let outcome = h.lp.tick(t0 + Duration::from_secs(120)).await;
        assert_eq!(outcome.action, TickAction::Scaled { from: 2, to: 1 });
    }

    #[tokio::test]
    async fn test_retained_value_respects_max() {
        let mut h = harness("unit/over-max", queue_config(), fast_loop_config());
        let t0 = Instant::now();
        h.metric.set(2.0);
        h.lp.tick(t0).await;

        // Someone scaled beyond max during the cooldown
        h.target.set_external(5);
        h.metric.set(0.0);
        let outcome = h.lp.tick(t0 + Duration::from_secs(1)).await;

        assert_eq!(outcome.desired, 2);
        assert_eq!(h.target.replicas(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_never_writes() {
        let loop_config = LoopConfig {
            dry_run: true,
            ..fast_loop_config()
        };
        let mut h = harness("unit/dry-run", queue_config(), loop_config);
        h.metric.set(10.0);

        let outcome = h.lp.tick(Instant::now()).await;

        assert_eq!(outcome.action, TickAction::DryRun { from: 0, to: 2 });
        assert_eq!(h.target.write_count(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = harness("unit/run", queue_config(), fast_loop_config());
        h.metric.set(1.0);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(h.lp.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(h.target.replicas(), 1);
        assert_eq!(h.target.write_count(), 1);
        assert_eq!(h.events.events_of_type("LoopStarted").len(), 1);
        assert_eq!(h.events.events_of_type("LoopStopped").len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_metric_read_prevents_write() {
        let loop_config = LoopConfig {
            metric_timeout: Duration::from_secs(1),
            ..fast_loop_config()
        };
        let h = harness("unit/cancel-mid-tick", queue_config(), loop_config);
        h.metric.set(2.0);
        h.metric.set_delay(Duration::from_millis(100));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(h.lp.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.target.replicas(), 0);
        assert_eq!(h.target.write_count(), 0);
        assert_eq!(h.events.events_of_type("LoopStopped").len(), 1);
    }

    #[tokio::test]
    async fn test_resumed_cooldown_suppresses_scale_down() {
        let h = harness("unit/resume", queue_config(), fast_loop_config());
        h.target.set_external(2);

        let mut lp = h
            .lp
            .resume_cooldown(Utc::now() - chrono::Duration::seconds(5));
        let outcome = lp.tick(Instant::now()).await;

        assert_eq!(
            outcome.action,
            TickAction::Suppressed {
                retained: 2,
                recommended: 0
            }
        );
        assert_eq!(h.target.write_count(), 0);
    }

    #[tokio::test]
    async fn test_resumed_expired_cooldown_applies_scale_down() {
        let h = harness("unit/resume-expired", queue_config(), fast_loop_config());
        h.target.set_external(2);

        let mut lp = h
            .lp
            .resume_cooldown(Utc::now() - chrono::Duration::seconds(120));
        let outcome = lp.tick(Instant::now()).await;

        assert_eq!(outcome.action, TickAction::Scaled { from: 2, to: 0 });
    }

    struct RejectedQuery {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl MetricSource for RejectedQuery {
        async fn get_value(&self) -> Result<MetricSample> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(Error::PrometheusQuery(
                "query returned 2 series, expected one".to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn test_rejected_query_is_not_retried() {
        let metric = Arc::new(RejectedQuery {
            calls: Default::default(),
        });
        let events = Arc::new(InMemoryEventCollector::new());
        let mut lp = ReconcileLoop::new(
            queue_config(),
            fast_loop_config(),
            metric.clone(),
            Arc::new(InMemoryScaleTarget::new("unit/rejected", 1)),
            events.clone(),
        )
        .unwrap();

        let outcome = lp.tick(Instant::now()).await;

        assert_eq!(outcome.action, TickAction::Skipped);
        assert_eq!(metric.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(matches!(
            events.events_of_type("MetricUnavailable").as_slice(),
            [DomainEvent::MetricUnavailable { attempts: 1, .. }]
        ));
    }
}
