//! In-memory adapters
//!
//! A scale target and a metric source that live entirely in process. Both
//! support failure injection so reconcile behaviour under outages and
//! conflicts can be exercised without a cluster.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::domain::ports::{MetricSample, MetricSource, ScaleTarget};
use crate::error::{Error, Result};

/// Decrement `counter` if positive. Returns whether it was.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// =============================================================================
// Scale Target
// =============================================================================

/// Replica count held in memory
#[derive(Debug)]
pub struct InMemoryScaleTarget {
    id: String,
    replicas: RwLock<u32>,
    writes: Mutex<Vec<u32>>,
    pending_conflicts: AtomicU32,
    pending_write_failures: AtomicU32,
    pending_read_failures: AtomicU32,
}

impl InMemoryScaleTarget {
    pub fn new(id: impl Into<String>, replicas: u32) -> Self {
        Self {
            id: id.into(),
            replicas: RwLock::new(replicas),
            writes: Mutex::new(Vec::new()),
            pending_conflicts: AtomicU32::new(0),
            pending_write_failures: AtomicU32::new(0),
            pending_read_failures: AtomicU32::new(0),
        }
    }

    pub fn replicas(&self) -> u32 {
        *self.replicas.read()
    }

    /// Successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    /// Values of every successful write, oldest first
    pub fn write_history(&self) -> Vec<u32> {
        self.writes.lock().clone()
    }

    /// Change replicas behind the loop's back.
    pub fn set_external(&self, replicas: u32) {
        *self.replicas.write() = replicas;
    }

    /// Reject the next `n` writes with `WriteConflict`.
    pub fn conflict_next(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` writes with a non-conflict error.
    pub fn fail_writes(&self, n: u32) {
        self.pending_write_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` reads.
    pub fn fail_reads(&self, n: u32) {
        self.pending_read_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ScaleTarget for InMemoryScaleTarget {
    async fn get_replicas(&self) -> Result<u32> {
        if take_one(&self.pending_read_failures) {
            return Err(Error::Internal(format!("injected read failure on {}", self.id)));
        }
        Ok(self.replicas())
    }

    async fn set_replicas(&self, replicas: u32) -> Result<()> {
        if take_one(&self.pending_conflicts) {
            return Err(Error::WriteConflict {
                target: self.id.clone(),
            });
        }
        if take_one(&self.pending_write_failures) {
            return Err(Error::Internal(format!("injected write failure on {}", self.id)));
        }

        *self.replicas.write() = replicas;
        self.writes.lock().push(replicas);
        Ok(())
    }

    fn id(&self) -> String {
        self.id.clone()
    }
}

// =============================================================================
// Metric Source
// =============================================================================

/// Metric source returning whatever value was last set
#[derive(Debug)]
pub struct StaticMetricSource {
    value: RwLock<f64>,
    delay: RwLock<Option<Duration>>,
    pending_failures: AtomicU32,
    calls: AtomicU32,
}

impl StaticMetricSource {
    pub fn new(value: f64) -> Self {
        Self {
            value: RwLock::new(value),
            delay: RwLock::new(None),
            pending_failures: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set(&self, value: f64) {
        *self.value.write() = value;
    }

    /// Fail the next `n` reads with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Delay every read by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = Some(delay);
    }

    /// Reads attempted so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricSource for StaticMetricSource {
    async fn get_value(&self) -> Result<MetricSample> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if take_one(&self.pending_failures) {
            return Err(Error::TransientMetric("injected failure".to_string()));
        }
        Ok(MetricSample::new(*self.value.read()))
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}
