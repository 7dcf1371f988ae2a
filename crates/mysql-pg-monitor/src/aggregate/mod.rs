//! Whole-system statistics derived from entity snapshots.
//!
//! Everything here is pure: [`summarize`] and [`rank`] take snapshots and a
//! [`History`] and never touch live entities.

mod history;

pub use history::{History, HistoryPoint};

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::core::{EntitySnapshot, PollerKind};

/// Estimated time until the target catches up with the source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Eta {
    /// The target already holds at least as many rows as the source.
    Complete,
    /// Rows are missing but nothing is arriving.
    Unknown,
    Remaining(Duration),
}

/// Per-shard totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardSummary {
    pub shard: String,
    pub entities: usize,
    pub total_target: i64,
    pub total_source: i64,
    pub drift: i64,
    pub inconsistent: usize,
    pub errors: usize,
}

/// Aggregate view over every entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub entity_count: usize,
    pub valid_count: usize,
    pub error_count: usize,
    pub consistent_count: usize,
    /// Includes errored entities.
    pub inconsistent_count: usize,
    pub changed_count: usize,
    pub total_target: i64,
    pub total_source: i64,
    /// `total_target - total_source`, over valid entities.
    pub drift: i64,
    pub total_change: i64,
    /// Target rows per second.
    pub throughput: f64,
    pub eta: Eta,
    pub shards: Vec<ShardSummary>,
    pub refreshing_target: usize,
    pub refreshing_source: usize,
}

impl Summary {
    /// Number of entities with a refresh of `kind` in flight.
    pub fn refreshing(&self, kind: PollerKind) -> usize {
        match kind {
            PollerKind::Target => self.refreshing_target,
            PollerKind::Source => self.refreshing_source,
        }
    }
}

/// Compute the summary for one set of snapshots.
pub fn summarize(entities: &[EntitySnapshot], history: &History) -> Summary {
    let mut summary = Summary {
        entity_count: entities.len(),
        valid_count: 0,
        error_count: 0,
        consistent_count: 0,
        inconsistent_count: 0,
        changed_count: 0,
        total_target: 0,
        total_source: 0,
        drift: 0,
        total_change: 0,
        throughput: 0.0,
        eta: Eta::Unknown,
        shards: Vec::new(),
        refreshing_target: 0,
        refreshing_source: 0,
    };
    let mut shards: BTreeMap<&str, ShardSummary> = BTreeMap::new();

    for e in entities {
        let shard = shards
            .entry(e.shard_id.as_str())
            .or_insert_with(|| ShardSummary {
                shard: e.shard_id.clone(),
                entities: 0,
                total_target: 0,
                total_source: 0,
                drift: 0,
                inconsistent: 0,
                errors: 0,
            });
        shard.entities += 1;

        if e.target_refresh_in_progress {
            summary.refreshing_target += 1;
        }
        if e.source_refresh_in_progress {
            summary.refreshing_source += 1;
        }

        if e.is_consistent() {
            summary.consistent_count += 1;
        } else {
            summary.inconsistent_count += 1;
            shard.inconsistent += 1;
        }

        if e.has_error() {
            summary.error_count += 1;
            shard.errors += 1;
            continue;
        }

        summary.valid_count += 1;
        summary.total_target += e.target_count;
        summary.total_source += e.source_count;
        shard.total_target += e.target_count;
        shard.total_source += e.source_count;

        let change = e.change();
        if change != 0 {
            summary.changed_count += 1;
            summary.total_change += change;
        }
    }

    summary.drift = summary.total_target - summary.total_source;
    summary.shards = shards
        .into_values()
        .map(|mut s| {
            s.drift = s.total_target - s.total_source;
            s
        })
        .collect();

    summary.throughput = history.throughput();
    summary.eta = estimate_eta(
        summary.total_source - summary.total_target,
        summary.throughput,
    );
    summary
}

fn estimate_eta(remaining: i64, throughput: f64) -> Eta {
    if remaining <= 0 {
        Eta::Complete
    } else if throughput <= 0.0 {
        Eta::Unknown
    } else {
        Duration::try_from_secs_f64(remaining as f64 / throughput)
            .map_or(Eta::Unknown, Eta::Remaining)
    }
}

/// Order entities for display: inconsistent first, then by absolute drift,
/// then by target size, then by name.
pub fn rank(entities: &[EntitySnapshot]) -> Vec<EntitySnapshot> {
    let mut ranked = entities.to_vec();
    ranked.sort_by(compare_for_display);
    ranked
}

fn compare_for_display(a: &EntitySnapshot, b: &EntitySnapshot) -> Ordering {
    a.is_consistent()
        .cmp(&b.is_consistent())
        .then_with(|| b.drift().abs().cmp(&a.drift().abs()))
        .then_with(|| b.target_count.cmp(&a.target_count))
        .then_with(|| a.shard_id.cmp(&b.shard_id))
        .then_with(|| a.canonical_name.cmp(&b.canonical_name))
}
