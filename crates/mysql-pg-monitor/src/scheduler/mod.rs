//! The polling control loop.
//!
//! After an awaited first pass over the cheap estimate paths, the scheduler
//! ticks every `refresh_interval`:
//!
//! 1. submit a target sweep per shard (skipped while the previous one runs)
//! 2. every `source_refresh_ratio` ticks, do the same for source sweeps
//! 3. prune finished sweeps
//! 4. capture a history point and publish a [`MonitorSnapshot`]
//!
//! Sweeps run as spawned tasks, so a slow shard never delays a tick.

mod sweeps;

pub use sweeps::{SweepKey, SweepSet};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregate::{summarize, History, HistoryPoint, Summary};
use crate::config::ScheduleSettings;
use crate::core::{EntitySnapshot, PollerKind, TargetDatabase};
use crate::error::Result;
use crate::poller::{Poller, SourcePoller, TargetPoller};
use crate::registry::{EntityGroup, Registry, ShardDiagnostic};

/// Everything a presentation layer needs for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub taken_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub target_ticks: u64,
    pub source_ticks: u64,
    /// Sweeps still running when the snapshot was taken.
    pub active_sweeps: usize,
    pub entities: Vec<EntitySnapshot>,
    pub summary: Summary,
    pub diagnostics: Vec<ShardDiagnostic>,
}

impl MonitorSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Mutable engine state owned by the scheduler.
#[derive(Debug)]
pub struct EngineState {
    pub target_ticks: u64,
    pub source_ticks: u64,
    pub history: History,
    pub started_at: DateTime<Utc>,
    /// Per-entity `target_refreshes` at the latest history point.
    seen_refreshes: Vec<u64>,
}

impl EngineState {
    fn new(settings: &ScheduleSettings) -> Self {
        Self {
            target_ticks: 0,
            source_ticks: 0,
            history: History::new(settings.history_capacity, settings.throughput_window),
            started_at: Utc::now(),
            seen_refreshes: Vec::new(),
        }
    }
}

pub struct Scheduler {
    registry: Arc<Registry>,
    source: Arc<dyn Poller>,
    target: Arc<dyn Poller>,
    settings: ScheduleSettings,
    cancel: CancellationToken,
    sweeps: SweepSet,
    state: EngineState,
    publisher: watch::Sender<Arc<MonitorSnapshot>>,
}

impl Scheduler {
    /// Create a scheduler over `registry`.
    ///
    /// Sweeps stop at their next network call once `cancel` fires.
    pub fn new(
        registry: Arc<Registry>,
        target: Arc<dyn TargetDatabase>,
        settings: ScheduleSettings,
        cancel: CancellationToken,
    ) -> Self {
        let source: Arc<dyn Poller> = Arc::new(SourcePoller::new(cancel.child_token()));
        let target: Arc<dyn Poller> = Arc::new(TargetPoller::new(target, cancel.child_token()));
        let state = EngineState::new(&settings);
        let initial = Arc::new(build_snapshot(&registry, &state, 0, registry.snapshots()));
        let (publisher, _) = watch::channel(initial);

        Self {
            registry,
            source,
            target,
            settings,
            cancel,
            sweeps: SweepSet::new(),
            state,
            publisher,
        }
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<MonitorSnapshot>> {
        self.publisher.subscribe()
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn sweeps(&self) -> &SweepSet {
        &self.sweeps
    }

    /// Run until the cancellation token fires.
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Monitoring {} entities across {} shards (refresh every {:?}, source every {} ticks)",
            self.registry.entity_count(),
            self.registry.groups().len(),
            self.settings.refresh_interval,
            self.settings.source_refresh_ratio
        );

        self.initial_pass().await;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.tick();

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.refresh_interval) => {}
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Estimate every count once, both backends concurrently, and publish.
    pub async fn initial_pass(&mut self) {
        let sweeps = self.registry.groups().iter().flat_map(|group| {
            [
                self.target.refresh(group, true),
                self.source.refresh(group, true),
            ]
        });
        let outcomes = join_all(sweeps).await;

        let refreshed: usize = outcomes.iter().map(|o| o.refreshed).sum();
        info!("Initial pass done: {} counts estimated", refreshed);
        self.publish();
    }

    /// One scheduling step. Never waits for a sweep.
    pub fn tick(&mut self) {
        self.state.target_ticks += 1;
        let groups = self.registry.groups().to_vec();

        for group in &groups {
            self.submit(PollerKind::Target, group);
        }

        if self.state.target_ticks % u64::from(self.settings.source_refresh_ratio) == 0 {
            self.state.source_ticks += 1;
            for group in &groups {
                self.submit(PollerKind::Source, group);
            }
        }

        self.sweeps.prune();
        self.publish();
    }

    fn submit(&mut self, kind: PollerKind, group: &Arc<EntityGroup>) {
        let poller = match kind {
            PollerKind::Source => Arc::clone(&self.source),
            PollerKind::Target => Arc::clone(&self.target),
        };
        let group = Arc::clone(group);
        let key = SweepKey::new(poller.kind(), group.shard_name());

        let spawned = self
            .sweeps
            .submit_if_idle(key.clone(), async move { poller.refresh(&group, false).await });
        if !spawned {
            debug!("Sweep {} still running, not resubmitted", key);
        }
    }

    fn publish(&mut self) {
        let entities = self.registry.snapshots();
        let point = HistoryPoint::capture(&entities, &self.state.seen_refreshes, Utc::now());
        self.state.history.push(point);
        self.state.seen_refreshes = entities.iter().map(|e| e.target_refreshes).collect();

        let snapshot = build_snapshot(&self.registry, &self.state, self.sweeps.pending(), entities);
        self.publisher.send_replace(Arc::new(snapshot));
    }

    /// Abort outstanding sweeps, wait for them to settle and publish a final
    /// snapshot.
    pub async fn shutdown(&mut self) {
        let aborted = self.sweeps.shutdown().await;
        info!("Scheduler stopped ({} sweeps aborted)", aborted);
        self.publish();
    }
}

fn build_snapshot(
    registry: &Registry,
    state: &EngineState,
    active_sweeps: usize,
    entities: Vec<EntitySnapshot>,
) -> MonitorSnapshot {
    let summary = summarize(&entities, &state.history);
    MonitorSnapshot {
        taken_at: Utc::now(),
        started_at: state.started_at,
        target_ticks: state.target_ticks,
        source_ticks: state.source_ticks,
        active_sweeps,
        entities,
        summary,
        diagnostics: registry.diagnostics().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::SourceShard;
    use crate::registry::discover;
    use crate::test_support::{FakeShard, FakeTarget};

    fn settings(ratio: u32) -> ScheduleSettings {
        ScheduleSettings {
            refresh_interval: Duration::from_secs(3),
            source_refresh_ratio: ratio,
            ..ScheduleSettings::default()
        }
    }

    async fn setup(
        shard: FakeShard,
        target: FakeTarget,
        ratio: u32,
    ) -> (Scheduler, Arc<FakeShard>, Arc<FakeTarget>, CancellationToken) {
        let shard = Arc::new(shard);
        let target = Arc::new(target);
        let dyn_shard: Arc<dyn SourceShard> = shard.clone();
        let registry = Arc::new(discover(vec![dyn_shard], &[]).await.unwrap());
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(registry, target.clone(), settings(ratio), cancel.clone());
        (scheduler, shard, target, cancel)
    }

    async fn settle(scheduler: &Scheduler) {
        while scheduler.sweeps().pending() > 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_initial_pass_uses_estimates_without_ticking() {
        let (mut scheduler, shard, target, _) = setup(
            FakeShard::new("shard_a").with_table("orders", 10),
            FakeTarget::new().with_table("shard_a", "orders", 8),
            3,
        )
        .await;
        let rx = scheduler.subscribe();

        scheduler.initial_pass().await;

        assert_eq!(scheduler.state().target_ticks, 0);
        assert_eq!(scheduler.state().source_ticks, 0);
        assert_eq!(shard.count_calls(), 0);
        assert_eq!(target.count_calls(), 0);

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.summary.total_source, 10);
        assert_eq!(snapshot.summary.total_target, 8);
        assert!(snapshot.entities[0].source_count_is_estimate);
        assert!(snapshot.entities[0].target_count_is_estimate);
    }

    #[tokio::test]
    async fn test_source_sweeps_follow_ratio() {
        let (mut scheduler, shard, target, _) = setup(
            FakeShard::new("shard_a").with_table("orders", 10),
            FakeTarget::new().with_table("shard_a", "orders", 10),
            3,
        )
        .await;

        for _ in 0..6 {
            scheduler.tick();
            settle(&scheduler).await;
        }

        assert_eq!(scheduler.state().target_ticks, 6);
        assert_eq!(scheduler.state().source_ticks, 2);
        assert_eq!(target.count_calls(), 6);
        assert_eq!(shard.count_calls(), 2);
    }

    #[tokio::test]
    async fn test_slow_sweep_is_not_resubmitted() {
        let (mut scheduler, _, target, _) = setup(
            FakeShard::new("shard_a").with_table("orders", 1),
            FakeTarget::new()
                .with_table("shard_a", "orders", 1)
                .with_delay(Duration::from_secs(3600)),
            100,
        )
        .await;

        scheduler.tick();
        while target.count_calls() == 0 {
            tokio::task::yield_now().await;
        }
        scheduler.tick();
        scheduler.tick();

        assert_eq!(target.count_calls(), 1);
        assert_eq!(scheduler.sweeps().pending(), 1);
        assert_eq!(scheduler.state().target_ticks, 3);

        scheduler.shutdown().await;
        assert_eq!(scheduler.sweeps().pending(), 0);
        assert!(!scheduler.registry.snapshots()[0].target_refresh_in_progress);
    }

    #[tokio::test]
    async fn test_history_counts_each_change_once() {
        let (mut scheduler, _, target, _) = setup(
            FakeShard::new("shard_a").with_table("orders", 200),
            FakeTarget::new().with_table("shard_a", "orders", 100),
            1,
        )
        .await;

        scheduler.tick();
        settle(&scheduler).await;
        target.set_count("shard_a", "orders", crate::test_support::FakeCount::Rows(150));
        scheduler.tick();
        settle(&scheduler).await;
        scheduler.tick();

        let deltas: Vec<i64> = scheduler
            .state()
            .history
            .iter()
            .map(|p| p.target_delta)
            .collect();
        assert_eq!(deltas.iter().sum::<i64>(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel_and_publishes_final_snapshot() {
        let (scheduler, _, _, cancel) = setup(
            FakeShard::new("shard_a").with_table("orders", 5),
            FakeTarget::new().with_table("shard_a", "orders", 5),
            2,
        )
        .await;
        let mut rx = scheduler.subscribe();
        let handle = tokio::spawn(scheduler.run());

        // Initial pass, then a few ticks
        for _ in 0..4 {
            rx.changed().await.unwrap();
        }
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let last = rx.borrow_and_update().clone();
        assert!(last.target_ticks >= 1);
        assert_eq!(last.active_sweeps, 0);
        assert_eq!(last.summary.consistent_count, 1);
        assert!(last.to_json().unwrap().contains("\"target_ticks\""));
    }

    #[tokio::test]
    async fn test_run_with_cancelled_token_returns() {
        let (scheduler, _, _, cancel) = setup(
            FakeShard::new("shard_a").with_table("orders", 5),
            FakeTarget::new().with_table("shard_a", "orders", 5),
            1,
        )
        .await;
        cancel.cancel();
        scheduler.run().await.unwrap();
    }
}
