//! Bounded time series of whole-system totals.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::EntitySnapshot;

/// Totals captured at one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryPoint {
    pub at: DateTime<Utc>,
    pub total_target: i64,
    pub total_source: i64,
    /// Target rows gained by refreshes that landed since the previous point.
    pub target_delta: i64,
}

impl HistoryPoint {
    /// Capture totals over valid entities.
    ///
    /// `seen` holds each entity's `target_refreshes` as of the previous point,
    /// index-aligned with `entities` (empty before the first point). Only
    /// entities refreshed since then contribute to `target_delta`, so every
    /// change is counted exactly once however sweeps and ticks interleave.
    pub fn capture(entities: &[EntitySnapshot], seen: &[u64], at: DateTime<Utc>) -> Self {
        let mut point = HistoryPoint {
            at,
            total_target: 0,
            total_source: 0,
            target_delta: 0,
        };

        for (i, e) in entities.iter().enumerate() {
            if e.has_error() {
                continue;
            }
            point.total_target += e.target_count;
            point.total_source += e.source_count;
            if e.target_refreshes > seen.get(i).copied().unwrap_or(0) {
                point.target_delta += e.change();
            }
        }
        point
    }
}

/// FIFO of [`HistoryPoint`]s; the oldest point is evicted at capacity.
#[derive(Debug, Clone)]
pub struct History {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
    window: usize,
}

impl History {
    /// `capacity` bounds memory; `window` is how many recent points feed the
    /// throughput estimate. Both are raised to at least 2.
    pub fn new(capacity: usize, window: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
            window: window.max(2),
        }
    }

    pub fn push(&mut self, point: HistoryPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryPoint> {
        self.points.iter()
    }

    /// Target rows per second over the last `window` points.
    ///
    /// Sums the positive deltas of every point after the oldest one in the
    /// window and divides by the time spanned. Returns 0.0 with fewer than
    /// two points or a non-positive span.
    pub fn throughput(&self) -> f64 {
        let take = self.window.min(self.points.len());
        if take < 2 {
            return 0.0;
        }

        let recent: Vec<&HistoryPoint> = self
            .points
            .iter()
            .skip(self.points.len() - take)
            .collect();
        let (first, last) = (recent[0], recent[take - 1]);
        let elapsed = (last.at - first.at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return 0.0;
        }

        let gained: i64 = recent[1..]
            .iter()
            .map(|p| p.target_delta)
            .filter(|d| *d > 0)
            .sum();
        gained as f64 / elapsed
    }
}
