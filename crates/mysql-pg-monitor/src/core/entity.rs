//! Monitored entities and their refresh guards.
//!
//! An [`Entity`] pairs one target table with the set of physical source tables
//! that replicate into it. Its identity is fixed at discovery; its counters are
//! mutated in place by the pollers for the lifetime of the session.
//!
//! Counters are split per [`PollerKind`], each behind its own lock, and can
//! only be written through a [`RefreshGuard`] of the same kind. Acquiring the
//! guard is an atomic check-and-set on the kind's in-flight flag, so holding a
//! guard is both the permission to write and the signal that a refresh is
//! already under way. The flag is cleared when the guard is dropped, which
//! also happens when the owning task is aborted or panics.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Sentinel count meaning "the last refresh failed".
pub const ERROR_COUNT: i64 = -1;

/// How far in the past refresh timestamps start, so the first real refresh is
/// always considered newer than anything seen before.
const NEVER_REFRESHED_AGE_DAYS: i64 = 365;

/// Which backend a refresh reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerKind {
    /// The sharded MySQL cluster.
    Source,
    /// The consolidated PostgreSQL database.
    Target,
}

impl fmt::Display for PollerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollerKind::Source => write!(f, "source"),
            PollerKind::Target => write!(f, "target"),
        }
    }
}

#[derive(Debug, Clone)]
struct TargetCounters {
    count: i64,
    previous: i64,
    is_estimate: bool,
    refreshed_at: DateTime<Utc>,
    first_refresh_done: bool,
    refreshes: u64,
}

#[derive(Debug, Clone)]
struct SourceCounters {
    count: i64,
    is_estimate: bool,
    refreshed_at: DateTime<Utc>,
}

/// One target table and the source tables rolled into it.
pub struct Entity {
    shard_id: String,
    canonical_name: String,
    source_members: Vec<String>,
    target: Mutex<TargetCounters>,
    source: Mutex<SourceCounters>,
    target_in_flight: AtomicBool,
    source_in_flight: AtomicBool,
}

impl Entity {
    /// Create a freshly discovered entity with zeroed counts.
    ///
    /// `source_members` must be non-empty and every member must normalize to
    /// `canonical_name`; the registry guarantees both.
    pub fn new(
        shard_id: impl Into<String>,
        canonical_name: impl Into<String>,
        source_members: Vec<String>,
    ) -> Self {
        let never = Utc::now() - ChronoDuration::days(NEVER_REFRESHED_AGE_DAYS);
        let canonical_name = canonical_name.into();

        debug_assert!(!source_members.is_empty());
        debug_assert!(source_members
            .iter()
            .all(|m| super::normalize::normalize(m) == canonical_name));

        Self {
            shard_id: shard_id.into(),
            canonical_name,
            source_members,
            target: Mutex::new(TargetCounters {
                count: 0,
                previous: 0,
                is_estimate: false,
                refreshed_at: never,
                first_refresh_done: false,
                refreshes: 0,
            }),
            source: Mutex::new(SourceCounters {
                count: 0,
                is_estimate: false,
                refreshed_at: never,
            }),
            target_in_flight: AtomicBool::new(false),
            source_in_flight: AtomicBool::new(false),
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn source_members(&self) -> &[String] {
        &self.source_members
    }

    /// Schema-qualified target name (`shard.table`).
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.shard_id, self.canonical_name)
    }

    fn flag(&self, kind: PollerKind) -> &AtomicBool {
        match kind {
            PollerKind::Source => &self.source_in_flight,
            PollerKind::Target => &self.target_in_flight,
        }
    }

    /// Whether a refresh of `kind` is currently in flight.
    pub fn is_refreshing(&self, kind: PollerKind) -> bool {
        self.flag(kind).load(Ordering::Acquire)
    }

    /// Claim the right to refresh this entity's `kind` counters.
    ///
    /// Returns `None` when another refresh of the same kind holds the claim;
    /// callers skip the entity for this cycle.
    pub fn try_begin_refresh(self: &Arc<Self>, kind: PollerKind) -> Option<RefreshGuard> {
        self.flag(kind)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard {
                entity: Arc::clone(self),
                kind,
            })
    }

    /// Copy the current state into an immutable snapshot.
    pub fn snapshot(&self) -> EntitySnapshot {
        let target = self.target.lock().clone();
        let source = self.source.lock().clone();

        EntitySnapshot {
            shard_id: self.shard_id.clone(),
            canonical_name: self.canonical_name.clone(),
            source_members: self.source_members.clone(),
            target_count: target.count,
            previous_target_count: target.previous,
            target_count_is_estimate: target.is_estimate,
            target_refreshed_at: target.refreshed_at,
            first_refresh_done: target.first_refresh_done,
            target_refreshes: target.refreshes,
            source_count: source.count,
            source_count_is_estimate: source.is_estimate,
            source_refreshed_at: source.refreshed_at,
            target_refresh_in_progress: self.is_refreshing(PollerKind::Target),
            source_refresh_in_progress: self.is_refreshing(PollerKind::Source),
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("shard_id", &self.shard_id)
            .field("canonical_name", &self.canonical_name)
            .field("source_members", &self.source_members)
            .finish_non_exhaustive()
    }
}

/// Exclusive permission to write one kind of counters on one entity.
///
/// Dropping the guard releases the in-flight flag.
#[must_use = "dropping the guard immediately releases the refresh claim"]
pub struct RefreshGuard {
    entity: Arc<Entity>,
    kind: PollerKind,
}

impl RefreshGuard {
    /// Record a target count (`ERROR_COUNT` for a failed refresh).
    ///
    /// The first recorded value seeds `previous_target_count`, so velocity is
    /// zero on the first refresh.
    pub fn record_target(&self, count: i64, is_estimate: bool, at: DateTime<Utc>) {
        debug_assert_eq!(self.kind, PollerKind::Target);
        let mut target = self.entity.target.lock();
        target.previous = if target.first_refresh_done {
            target.count
        } else {
            count
        };
        target.first_refresh_done = true;
        target.count = count;
        target.is_estimate = is_estimate && count != ERROR_COUNT;
        target.refreshed_at = at;
        target.refreshes += 1;
    }

    /// Record a failed target refresh.
    pub fn record_target_failure(&self, at: DateTime<Utc>) {
        self.record_target(ERROR_COUNT, false, at);
    }

    /// Record a source count summed across the entity's members.
    pub fn record_source(&self, count: i64, is_estimate: bool, at: DateTime<Utc>) {
        debug_assert_eq!(self.kind, PollerKind::Source);
        let mut source = self.entity.source.lock();
        source.count = count;
        source.is_estimate = is_estimate && count != ERROR_COUNT;
        source.refreshed_at = at;
    }

    /// Record a failed source refresh.
    pub fn record_source_failure(&self, at: DateTime<Utc>) {
        self.record_source(ERROR_COUNT, false, at);
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.entity.flag(self.kind).store(false, Ordering::Release);
    }
}

/// Immutable copy of an entity, handed to the aggregator and presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub shard_id: String,
    pub canonical_name: String,
    pub source_members: Vec<String>,
    pub target_count: i64,
    pub previous_target_count: i64,
    pub target_count_is_estimate: bool,
    pub target_refreshed_at: DateTime<Utc>,
    pub first_refresh_done: bool,
    /// Number of target refreshes recorded so far, failures included.
    #[serde(default)]
    pub target_refreshes: u64,
    pub source_count: i64,
    pub source_count_is_estimate: bool,
    pub source_refreshed_at: DateTime<Utc>,
    pub target_refresh_in_progress: bool,
    pub source_refresh_in_progress: bool,
}

impl EntitySnapshot {
    /// Schema-qualified target name (`shard.table`).
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.shard_id, self.canonical_name)
    }

    /// True when either side's last refresh failed.
    pub fn has_error(&self) -> bool {
        self.target_count == ERROR_COUNT || self.source_count == ERROR_COUNT
    }

    /// Both counts are valid and equal.
    pub fn is_consistent(&self) -> bool {
        !self.has_error() && self.target_count == self.source_count
    }

    /// `target - source`, or 0 while either side is in error.
    pub fn drift(&self) -> i64 {
        if self.has_error() {
            0
        } else {
            self.target_count - self.source_count
        }
    }

    /// Target rows gained since the previous refresh.
    ///
    /// Zero until the first refresh, and zero when either side of the
    /// difference is the error sentinel.
    pub fn change(&self) -> i64 {
        if !self.first_refresh_done
            || self.target_count == ERROR_COUNT
            || self.previous_target_count == ERROR_COUNT
        {
            0
        } else {
            self.target_count - self.previous_target_count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> Arc<Entity> {
        Arc::new(Entity::new(
            "shard_a",
            "orders",
            vec!["orders_runtime".to_string(), "orders_333367878".to_string()],
        ))
    }

    #[test]
    fn test_new_entity_is_zeroed_and_stale() {
        let snap = entity().snapshot();
        assert_eq!(snap.target_count, 0);
        assert_eq!(snap.source_count, 0);
        assert!(!snap.first_refresh_done);
        assert!(snap.target_refreshed_at < Utc::now() - ChronoDuration::days(300));
        assert!(snap.source_refreshed_at < Utc::now() - ChronoDuration::days(300));
        assert_eq!(snap.full_name(), "shard_a.orders");
    }

    #[test]
    fn test_guard_is_exclusive_per_kind() {
        let e = entity();
        let guard = e.try_begin_refresh(PollerKind::Target).unwrap();
        assert!(e.is_refreshing(PollerKind::Target));
        assert!(e.try_begin_refresh(PollerKind::Target).is_none());

        // The other kind is independent
        let source_guard = e.try_begin_refresh(PollerKind::Source).unwrap();
        assert!(e.is_refreshing(PollerKind::Source));

        drop(guard);
        assert!(!e.is_refreshing(PollerKind::Target));
        assert!(e.try_begin_refresh(PollerKind::Target).is_some());

        drop(source_guard);
        assert!(!e.is_refreshing(PollerKind::Source));
    }

    #[test]
    fn test_guard_released_on_panic() {
        let e = entity();
        let cloned = Arc::clone(&e);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = cloned.try_begin_refresh(PollerKind::Source).unwrap();
            panic!("query blew up");
        }));
        assert!(result.is_err());
        assert!(!e.is_refreshing(PollerKind::Source));
    }

    #[test]
    fn test_first_target_refresh_seeds_previous() {
        let e = entity();
        let now = Utc::now();
        {
            let guard = e.try_begin_refresh(PollerKind::Target).unwrap();
            guard.record_target(100, true, now);
        }
        let snap = e.snapshot();
        assert_eq!(snap.target_count, 100);
        assert_eq!(snap.previous_target_count, 100);
        assert!(snap.target_count_is_estimate);
        assert!(snap.first_refresh_done);
        assert_eq!(snap.change(), 0);
        assert_eq!(snap.target_refreshes, 1);

        {
            let guard = e.try_begin_refresh(PollerKind::Target).unwrap();
            guard.record_target(130, false, now);
        }
        let snap = e.snapshot();
        assert_eq!(snap.previous_target_count, 100);
        assert_eq!(snap.change(), 30);
        assert_eq!(snap.target_refreshes, 2);
        assert!(!snap.target_count_is_estimate);
    }

    #[test]
    fn test_first_target_failure_sets_previous_to_sentinel() {
        let e = entity();
        let guard = e.try_begin_refresh(PollerKind::Target).unwrap();
        let at = Utc::now();
        guard.record_target_failure(at);
        drop(guard);

        let snap = e.snapshot();
        assert_eq!(snap.target_count, ERROR_COUNT);
        assert_eq!(snap.previous_target_count, ERROR_COUNT);
        assert_eq!(snap.target_refreshed_at, at);
        assert!(snap.first_refresh_done);
        assert_eq!(snap.change(), 0);
    }

    #[test]
    fn test_failure_after_success_shifts_previous() {
        let e = entity();
        let guard = e.try_begin_refresh(PollerKind::Target).unwrap();
        guard.record_target(50, false, Utc::now());
        guard.record_target_failure(Utc::now());
        drop(guard);

        let snap = e.snapshot();
        assert_eq!(snap.previous_target_count, 50);
        assert_eq!(snap.target_count, ERROR_COUNT);
        assert_eq!(snap.change(), 0);
        assert!(snap.has_error());
    }

    #[test]
    fn test_consistency_and_drift() {
        let e = entity();
        let now = Utc::now();
        let t = e.try_begin_refresh(PollerKind::Target).unwrap();
        let s = e.try_begin_refresh(PollerKind::Source).unwrap();

        t.record_target(1000, false, now);
        s.record_source(1000, false, now);
        let snap = e.snapshot();
        assert!(snap.is_consistent());
        assert_eq!(snap.drift(), 0);

        t.record_target(997, false, now);
        let snap = e.snapshot();
        assert!(!snap.is_consistent());
        assert_eq!(snap.drift(), -3);
    }

    #[test]
    fn test_both_sentinels_are_inconsistent() {
        let e = entity();
        let now = Utc::now();
        let t = e.try_begin_refresh(PollerKind::Target).unwrap();
        let s = e.try_begin_refresh(PollerKind::Source).unwrap();
        t.record_target_failure(now);
        s.record_source_failure(now);

        let snap = e.snapshot();
        assert_eq!(snap.target_count, snap.source_count);
        assert!(!snap.is_consistent());
        assert_eq!(snap.drift(), 0);
    }

    #[test]
    fn test_snapshot_reports_in_flight() {
        let e = entity();
        let _guard = e.try_begin_refresh(PollerKind::Source).unwrap();
        let snap = e.snapshot();
        assert!(snap.source_refresh_in_progress);
        assert!(!snap.target_refresh_in_progress);
    }
}
