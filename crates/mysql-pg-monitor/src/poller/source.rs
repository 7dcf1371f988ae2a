//! Source (MySQL shard) count refresh.

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Poller, SweepOutcome, SweepStatus};
use crate::core::{CountHint, PollerKind, SourceShard};
use crate::registry::EntityGroup;

/// Result of counting one member table.
enum MemberCount {
    Rows(i64),
    /// Rejected even without the index hint; left out of the sum.
    Rejected,
    Unreachable,
    Cancelled,
}

/// Refreshes source counts by summing every member table of an entity.
pub struct SourcePoller {
    cancel: CancellationToken,
}

impl SourcePoller {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// One catalog query per shard; members missing from it contribute 0.
    async fn refresh_estimated(&self, group: &EntityGroup) -> SweepOutcome {
        let shard = group.shard();
        let mut outcome = SweepOutcome::default();
        if self.cancel.is_cancelled() {
            return outcome.cancelled();
        }

        let estimates = shard.approximate_row_counts().await;
        let now = Utc::now();
        if let Err(e) = &estimates {
            warn!("Row estimates unavailable for shard {}: {}", shard.name(), e);
            outcome.status = SweepStatus::Unreachable;
        }

        for entity in group.entities() {
            let Some(guard) = entity.try_begin_refresh(PollerKind::Source) else {
                outcome.skipped += 1;
                continue;
            };
            match &estimates {
                Ok(estimates) => {
                    let total = entity
                        .source_members()
                        .iter()
                        .map(|m| estimates.get(m).copied().unwrap_or(0))
                        .sum();
                    guard.record_source(total, true, now);
                    outcome.refreshed += 1;
                }
                Err(_) => {
                    guard.record_source_failure(now);
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    async fn refresh_exact(&self, group: &EntityGroup) -> SweepOutcome {
        let shard = group.shard().as_ref();
        let mut outcome = SweepOutcome::default();
        let mut unreachable = false;

        for entity in group.entities() {
            let Some(guard) = entity.try_begin_refresh(PollerKind::Source) else {
                outcome.skipped += 1;
                continue;
            };

            if unreachable {
                guard.record_source_failure(Utc::now());
                outcome.failed += 1;
                continue;
            }

            let mut total = 0;
            let mut counted = 0;
            for member in entity.source_members() {
                match self.count_member(shard, member).await {
                    MemberCount::Rows(rows) => {
                        total += rows;
                        counted += 1;
                    }
                    MemberCount::Rejected => {}
                    MemberCount::Unreachable => {
                        unreachable = true;
                        break;
                    }
                    MemberCount::Cancelled => return outcome.cancelled(),
                }
            }

            if unreachable {
                guard.record_source_failure(Utc::now());
                outcome.failed += 1;
            } else {
                if counted == 0 {
                    debug!(
                        "No member of {} could be counted on shard {}",
                        entity.canonical_name(),
                        shard.name()
                    );
                }
                guard.record_source(total, false, Utc::now());
                outcome.refreshed += 1;
            }
        }

        if unreachable {
            outcome.status = SweepStatus::Unreachable;
        }
        outcome
    }

    /// Count with the primary key hint, retrying without it when the
    /// statement is rejected.
    async fn count_member(&self, shard: &dyn SourceShard, table: &str) -> MemberCount {
        let mut last_error = None;
        for hint in [CountHint::PrimaryKey, CountHint::None] {
            if self.cancel.is_cancelled() {
                return MemberCount::Cancelled;
            }
            match shard.count_rows(table, hint).await {
                Ok(rows) => return MemberCount::Rows(rows),
                Err(e) if e.is_connection_failure() => {
                    warn!("Shard {} unreachable while counting {}: {}", shard.name(), table, e);
                    return MemberCount::Unreachable;
                }
                Err(e) => last_error = Some(e),
            }
        }

        if let Some(e) = last_error {
            debug!("Skipping {}.{}: {}", shard.name(), table, e);
        }
        MemberCount::Rejected
    }
}

#[async_trait]
impl Poller for SourcePoller {
    fn kind(&self) -> PollerKind {
        PollerKind::Source
    }

    async fn refresh(&self, group: &EntityGroup, fast: bool) -> SweepOutcome {
        let outcome = if fast {
            self.refresh_estimated(group).await
        } else {
            self.refresh_exact(group).await
        };
        debug!(
            "Source sweep of {} ({}): {:?}",
            group.shard_name(),
            if fast { "estimate" } else { "exact" },
            outcome
        );
        outcome
    }
}
