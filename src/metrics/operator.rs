//! Operator self-metrics
//!
//! Registered in the default Prometheus registry and served on `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec, register_int_counter_vec, register_int_gauge_vec, GaugeVec,
    IntCounterVec, IntGaugeVec,
};

pub static RECONCILE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "scaledrive_reconcile_total",
        "Total number of reconcile ticks",
        &["target"]
    )
    .expect("scaledrive_reconcile_total registers once")
});

pub static SCALING_WRITES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "scaledrive_scaling_writes_total",
        "Replica writes issued, by direction and outcome",
        &["target", "direction", "outcome"]
    )
    .expect("scaledrive_scaling_writes_total registers once")
});

pub static METRIC_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "scaledrive_metric_errors_total",
        "Failed metric source queries",
        &["target"]
    )
    .expect("scaledrive_metric_errors_total registers once")
});

pub static SUPPRESSED_SCALE_DOWNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "scaledrive_suppressed_scale_downs_total",
        "Scale-down recommendations held back by the cooldown",
        &["target"]
    )
    .expect("scaledrive_suppressed_scale_downs_total registers once")
});

pub static DESIRED_REPLICAS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "scaledrive_desired_replicas",
        "Desired replica count after policy and cooldown",
        &["target"]
    )
    .expect("scaledrive_desired_replicas registers once")
});

pub static METRIC_VALUE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "scaledrive_metric_value",
        "Last metric value read for a target",
        &["target"]
    )
    .expect("scaledrive_metric_value registers once")
});

/// Force registration so `/metrics` lists every family from startup.
pub fn register() {
    Lazy::force(&RECONCILE_TOTAL);
    Lazy::force(&SCALING_WRITES_TOTAL);
    Lazy::force(&METRIC_ERRORS_TOTAL);
    Lazy::force(&SUPPRESSED_SCALE_DOWNS_TOTAL);
    Lazy::force(&DESIRED_REPLICAS);
    Lazy::force(&METRIC_VALUE);
}

/// Drop all series for a target whose loop stopped.
pub fn forget_target(target: &str) {
    let _ = RECONCILE_TOTAL.remove_label_values(&[target]);
    let _ = METRIC_ERRORS_TOTAL.remove_label_values(&[target]);
    let _ = SUPPRESSED_SCALE_DOWNS_TOTAL.remove_label_values(&[target]);
    let _ = DESIRED_REPLICAS.remove_label_values(&[target]);
    let _ = METRIC_VALUE.remove_label_values(&[target]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_labelled_per_target() {
        register();
        RECONCILE_TOTAL.with_label_values(&["test/Deployment/a"]).inc();
        RECONCILE_TOTAL.with_label_values(&["test/Deployment/a"]).inc();
        assert_eq!(
            RECONCILE_TOTAL
                .with_label_values(&["test/Deployment/a"])
                .get(),
            2
        );
        assert_eq!(
            RECONCILE_TOTAL
                .with_label_values(&["test/Deployment/b"])
                .get(),
            0
        );
    }

    #[test]
    fn test_forget_target_resets_gauge() {
        DESIRED_REPLICAS
            .with_label_values(&["test/Deployment/gone"])
            .set(4);
        forget_target("test/Deployment/gone");
        assert_eq!(
            DESIRED_REPLICAS
                .with_label_values(&["test/Deployment/gone"])
                .get(),
            0
        );
    }
}
