//! Outstanding sweep tasks, at most one per (kind, shard).

use std::collections::HashMap;
use std::future::Future;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::PollerKind;
use crate::poller::SweepOutcome;

/// Identifies one logical sweep slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SweepKey {
    pub kind: PollerKind,
    pub shard: String,
}

impl SweepKey {
    pub fn new(kind: PollerKind, shard: impl Into<String>) -> Self {
        Self {
            kind,
            shard: shard.into(),
        }
    }
}

impl std::fmt::Display for SweepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.shard)
    }
}

/// Spawned sweeps keyed by [`SweepKey`].
#[derive(Default)]
pub struct SweepSet {
    tasks: HashMap<SweepKey, JoinHandle<SweepOutcome>>,
}

impl SweepSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `sweep` unless a sweep for `key` is still running.
    ///
    /// Returns whether the sweep was spawned. Must be called inside a Tokio
    /// runtime.
    pub fn submit_if_idle<F>(&mut self, key: SweepKey, sweep: F) -> bool
    where
        F: Future<Output = SweepOutcome> + Send + 'static,
    {
        if let Some(handle) = self.tasks.get(&key) {
            if !handle.is_finished() {
                return false;
            }
        }
        self.tasks.insert(key, tokio::spawn(sweep));
        true
    }

    /// Remove finished sweeps and return their outcomes.
    ///
    /// A sweep that panicked is logged and left out.
    pub fn prune(&mut self) -> Vec<(SweepKey, SweepOutcome)> {
        let finished: Vec<SweepKey> = self
            .tasks
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(k, _)| k.clone())
            .collect();

        let mut outcomes = Vec::with_capacity(finished.len());
        for key in finished {
            let Some(handle) = self.tasks.remove(&key) else {
                continue;
            };
            match handle.now_or_never() {
                Some(Ok(outcome)) => {
                    debug!("Sweep {} finished: {:?}", key, outcome);
                    outcomes.push((key, outcome));
                }
                Some(Err(e)) => warn!("Sweep {} failed: {}", key, e),
                None => {}
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }

    /// Number of sweeps still running.
    pub fn pending(&self) -> usize {
        self.tasks.values().filter(|h| !h.is_finished()).count()
    }

    pub fn is_pending(&self, key: &SweepKey) -> bool {
        self.tasks.get(key).is_some_and(|h| !h.is_finished())
    }

    /// Abort every sweep and wait until each has settled, so all refresh
    /// guards are released on return. Returns how many were still running.
    pub async fn shutdown(&mut self) -> usize {
        let running = self.pending();
        for handle in self.tasks.values() {
            handle.abort();
        }
        for (key, handle) in self.tasks.drain() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Sweep {} failed during shutdown: {}", key, e);
                }
            }
        }
        running
    }
}
