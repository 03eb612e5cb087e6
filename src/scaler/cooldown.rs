//! Cooldown Gate
//!
//! Holds back scale-down for a fixed period after the last scale-up.
//!
//! ```text
//!            scale-up (re-arms)
//!          ┌───────────────────┐
//!          ▼                   │
//!  Idle ──scale-up──▶ CoolingDown ──now - last_scale_up >= period──▶ Idle
//! ```
//!
//! Scale-up recommendations always pass. Scale-down recommendations made
//! while cooling down are replaced by the current replica count.

use std::time::Duration;

use tokio::time::Instant;

/// Observable gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    CoolingDown { remaining: Duration },
}

/// Outcome of passing a recommendation through the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Use the recommendation as-is
    Apply(u32),
    /// Scale-down held back; keep `retained`
    Suppressed {
        retained: u32,
        recommended: u32,
        remaining: Duration,
    },
}

impl GateDecision {
    /// Replica count after gating.
    pub fn replicas(&self) -> u32 {
        match self {
            GateDecision::Apply(r) => *r,
            GateDecision::Suppressed { retained, .. } => *retained,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, GateDecision::Suppressed { .. })
    }
}

/// Stateful scale-down suppressor owned by a single reconcile loop
#[derive(Debug, Clone)]
pub struct CooldownGate {
    period: Duration,
    last_scale_up_at: Option<Instant>,
}

impl CooldownGate {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_scale_up_at: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn last_scale_up_at(&self) -> Option<Instant> {
        self.last_scale_up_at
    }

    /// Current state as seen at `now`.
    pub fn state(&self, now: Instant) -> GateState {
        match self.last_scale_up_at {
            Some(at) => {
                let elapsed = now.saturating_duration_since(at);
                if elapsed >= self.period {
                    GateState::Idle
                } else {
                    GateState::CoolingDown {
                        remaining: self.period - elapsed,
                    }
                }
            }
            None => GateState::Idle,
        }
    }

    /// Re-arm from a scale-up that happened `elapsed` before `now`.
    ///
    /// Used when a loop is rebuilt and the scale-up is only known from
    /// status. An expired scale-up leaves the gate idle.
    pub fn restore(&mut self, elapsed: Duration, now: Instant) {
        if elapsed >= self.period {
            return;
        }
        self.last_scale_up_at = Some(now.checked_sub(elapsed).unwrap_or(now));
    }

    /// Arm (or re-arm) the cooldown timer.
    pub fn record_scale_up(&mut self, now: Instant) {
        self.last_scale_up_at = Some(now);
    }

    /// Gate a recommendation against the current replica count.
    pub fn evaluate(&mut self, current: u32, recommended: u32, now: Instant) -> GateDecision {
        if recommended > current {
            self.record_scale_up(now);
            return GateDecision::Apply(recommended);
        }

        if recommended < current {
            if let GateState::CoolingDown { remaining } = self.state(now) {
                return GateDecision::Suppressed {
                    retained: current,
                    recommended,
                    remaining,
                };
            }
        }

        GateDecision::Apply(recommended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_starts_idle() {
        let gate = CooldownGate::new(MINUTE);
        assert_eq!(gate.state(Instant::now()), GateState::Idle);
        assert!(gate.last_scale_up_at().is_none());
    }

    #[test]
    fn test_scale_down_without_prior_scale_up_applies() {
        let mut gate = CooldownGate::new(MINUTE);
        let decision = gate.evaluate(2, 0, Instant::now());
        assert_eq!(decision, GateDecision::Apply(0));
    }

    #[test]
    fn test_scale_down_suppressed_within_cooldown() {
        let mut gate = CooldownGate::new(MINUTE);
        let t0 = Instant::now();

        assert_eq!(gate.evaluate(0, 2, t0), GateDecision::Apply(2));

        let decision = gate.evaluate(2, 0, t0 + Duration::from_secs(30));
        assert_eq!(
            decision,
            GateDecision::Suppressed {
                retained: 2,
                recommended: 0,
                remaining: Duration::from_secs(30),
            }
        );
        assert_eq!(decision.replicas(), 2);
    }

    #[test]
    fn test_scale_down_applied_after_cooldown() {
        let mut gate = CooldownGate::new(MINUTE);
        let t0 = Instant::now();
        gate.evaluate(0, 2, t0);

        let decision = gate.evaluate(2, 0, t0 + Duration::from_secs(61));
        assert_eq!(decision, GateDecision::Apply(0));
    }

    #[test]
    fn test_exact_boundary_returns_to_idle() {
        let mut gate = CooldownGate::new(MINUTE);
        let t0 = Instant::now();
        gate.record_scale_up(t0);
        assert_eq!(gate.state(t0 + MINUTE), GateState::Idle);
    }

    #[test]
    fn test_scale_up_rearms_timer() {
        let mut gate = CooldownGate::new(MINUTE);
        let t0 = Instant::now();
        gate.evaluate(0, 1, t0);
        gate.evaluate(1, 2, t0 + Duration::from_secs(50));

        // 70s after the first scale-up but only 20s after the second
        let decision = gate.evaluate(2, 0, t0 + Duration::from_secs(70));
        assert!(decision.is_suppressed());
        assert_eq!(gate.last_scale_up_at(), Some(t0 + Duration::from_secs(50)));
    }

    #[test]
    fn test_scale_up_never_suppressed() {
        let mut gate = CooldownGate::new(MINUTE);
        let t0 = Instant::now();
        gate.evaluate(0, 1, t0);
        assert_eq!(
            gate.evaluate(1, 5, t0 + Duration::from_secs(1)),
            GateDecision::Apply(5)
        );
    }

    #[test]
    fn test_unchanged_recommendation_does_not_arm() {
        let mut gate = CooldownGate::new(MINUTE);
        let decision = gate.evaluate(2, 2, Instant::now());
        assert_eq!(decision, GateDecision::Apply(2));
        assert!(gate.last_scale_up_at().is_none());
    }

    #[test]
    fn test_restored_scale_up_keeps_suppressing() {
        let mut gate = CooldownGate::new(MINUTE);
        let now = Instant::now();
        gate.restore(Duration::from_secs(5), now);

        assert_eq!(
            gate.state(now),
            GateState::CoolingDown {
                remaining: Duration::from_secs(55)
            }
        );
        assert!(gate.evaluate(2, 0, now).is_suppressed());
        assert_eq!(
            gate.evaluate(2, 0, now + Duration::from_secs(56)),
            GateDecision::Apply(0)
        );
    }

    #[test]
    fn test_restored_expired_scale_up_is_idle() {
        let mut gate = CooldownGate::new(MINUTE);
        gate.restore(Duration::from_secs(61), Instant::now());
        assert!(gate.last_scale_up_at().is_none());
    }

    #[test]
    fn test_zero_period_never_suppresses() {
        let mut gate = CooldownGate::new(Duration::ZERO);
        let t0 = Instant::now();
        gate.evaluate(0, 3, t0);
        assert_eq!(gate.evaluate(3, 0, t0), GateDecision::Apply(0));
    }
}
