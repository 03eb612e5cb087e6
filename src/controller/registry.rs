//! Running reconcile loops, keyed by ScaledObject uid

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::operator;
use crate::scaler::ReconcileLoop;

struct LoopHandle {
    generation: Option<i64>,
    target_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LoopHandle {
    /// Cancel the loop and wait until it can no longer write.
    async fn halt(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Reconcile loop for {} ended abnormally: {}", self.target_id, e);
        }
    }
}

/// Handle map for per-object loops. Holds no scaling state.
///
/// At most one loop per key is alive at a time: a loop is fully stopped
/// before its replacement is spawned.
#[derive(Default)]
pub struct LoopRegistry {
    loops: DashMap<String, LoopHandle>,
}

impl std::fmt::Debug for LoopRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopRegistry")
            .field("running", &self.loops.len())
            .finish()
    }
}

impl LoopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live loop built from `generation` is registered under `key`.
    pub fn is_current(&self, key: &str, generation: Option<i64>) -> bool {
        self.loops
            .get(key)
            .is_some_and(|h| h.generation == generation && !h.task.is_finished())
    }

    /// Spawn `reconcile_loop`, first stopping any loop already under `key`.
    pub async fn start(&self, key: &str, generation: Option<i64>, reconcile_loop: ReconcileLoop) {
        let target_id = reconcile_loop.target_id().to_string();

        if let Some((_, previous)) = self.loops.remove(key) {
            debug!(
                "Replacing loop for {} (generation {:?})",
                key, previous.generation
            );
            let previous_target = previous.target_id.clone();
            previous.halt().await;
            if previous_target != target_id {
                operator::forget_target(&previous_target);
            }
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(reconcile_loop.run(cancel.child_token()));
        self.loops.insert(
            key.to_string(),
            LoopHandle {
                generation,
                target_id,
                cancel,
                task,
            },
        );
        info!("Started loop for {} at generation {:?}", key, generation);
    }

    /// Stop the loop under `key` and wait for it to exit. Returns whether one
    /// was running.
    pub async fn stop(&self, key: &str) -> bool {
        match self.loops.remove(key) {
            Some((_, handle)) => {
                let target_id = handle.target_id.clone();
                handle.halt().await;
                operator::forget_target(&target_id);
                info!("Stopped loop for {}", key);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Cancel every loop and wait for them to finish.
    pub async fn shutdown(&self) {
        let keys: Vec<String> = self.loops.iter().map(|e| e.key().clone()).collect();
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, handle)) = self.loops.remove(&key) {
                handle.cancel.cancel();
                handles.push(handle);
            }
        }

        futures::future::join_all(handles.into_iter().map(|handle| async move {
            let target_id = handle.target_id.clone();
            handle.halt().await;
            operator::forget_target(&target_id);
        }))
        .await;
    }
}
