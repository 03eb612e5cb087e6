//! Property-Based Tests for the Scaling Core
//!
//! # Test Properties
//!
//! 1. **Bounded**: `compute` always lands in `[min, max]`
//! 2. **Idle floor**: a zero metric always yields `min`
//! 3. **Monotonic**: a larger metric never yields fewer replicas
//! 4. **Gate safety**: the gate never lowers replicas inside the cooldown

#![cfg(test)]

use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use super::cooldown::{CooldownGate, GateDecision};
use super::policy::compute;

// =============================================================================
// Property Strategies
// =============================================================================

/// Replica bounds with `min <= max`.
fn bounds_strategy() -> impl Strategy<Value = (u32, u32)> {
    (0u32..50, 0u32..50).prop_map(|(a, b)| (a.min(b), a.max(b)))
}

fn threshold_strategy() -> impl Strategy<Value = f64> {
    0.001f64..1_000.0
}

fn metric_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(0.0),
        0.0f64..10_000.0,
        Just(f64::MAX),
        Just(f64::NAN),
        -1_000.0f64..0.0,
    ]
}

// =============================================================================
// Policy Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_compute_is_bounded(
        metric in metric_strategy(),
        threshold in threshold_strategy(),
        (min, max) in bounds_strategy(),
    ) {
        let desired = compute(metric, threshold, min, max).unwrap();
        prop_assert!(desired >= min && desired <= max);
    }

    #[test]
    fn prop_zero_metric_yields_min(
        threshold in threshold_strategy(),
        (min, max) in bounds_strategy(),
    ) {
        prop_assert_eq!(compute(0.0, threshold, min, max).unwrap(), min);
    }

    #[test]
    fn prop_metric_at_threshold_yields_one(threshold in threshold_strategy(), max in 1u32..50) {
        prop_assert_eq!(compute(threshold, threshold, 0, max).unwrap(), 1);
    }

    #[test]
    fn prop_compute_is_monotonic(
        a in 0.0f64..10_000.0,
        b in 0.0f64..10_000.0,
        threshold in threshold_strategy(),
        (min, max) in bounds_strategy(),
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(
            compute(lo, threshold, min, max).unwrap() <= compute(hi, threshold, min, max).unwrap()
        );
    }
}

// =============================================================================
// Gate Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_gate_never_scales_down_while_cooling(
        period_secs in 1u64..600,
        elapsed_secs in 0u64..600,
        peak in 1u32..50,
        recommended in 0u32..50,
    ) {
        prop_assume!(elapsed_secs < period_secs);
        let mut gate = CooldownGate::new(Duration::from_secs(period_secs));
        let t0 = Instant::now();
        gate.evaluate(0, peak, t0);

        let decision = gate.evaluate(peak, recommended, t0 + Duration::from_secs(elapsed_secs));
        prop_assert!(decision.replicas() >= peak);
        if recommended < peak {
            prop_assert!(decision.is_suppressed(), "scale-down passed inside cooldown");
        }
    }

    #[test]
    fn prop_gate_applies_after_cooldown(
        period_secs in 0u64..600,
        extra_secs in 0u64..600,
        peak in 1u32..50,
        recommended in 0u32..50,
    ) {
        let mut gate = CooldownGate::new(Duration::from_secs(period_secs));
        let t0 = Instant::now();
        gate.evaluate(0, peak, t0);

        let later = t0 + Duration::from_secs(period_secs + extra_secs);
        prop_assert_eq!(gate.evaluate(peak, recommended, later), GateDecision::Apply(recommended));
    }

    #[test]
    fn prop_scale_up_always_passes(
        period_secs in 0u64..600,
        current in 0u32..50,
        bump in 1u32..50,
    ) {
        let mut gate = CooldownGate::new(Duration::from_secs(period_secs));
        let now = Instant::now();
        gate.evaluate(0, current, now);
        prop_assert_eq!(gate.evaluate(current, current + bump, now), GateDecision::Apply(current + bump));
        prop_assert_eq!(gate.last_scale_up_at(), Some(now));
    }
}
