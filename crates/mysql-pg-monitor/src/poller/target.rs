//! Target (PostgreSQL) count refresh.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Poller, SweepOutcome, SweepStatus};
use crate::core::{Entity, PollerKind, TargetDatabase};
use crate::registry::EntityGroup;

/// Refreshes target counts. The target schema is the shard name.
pub struct TargetPoller {
    target: Arc<dyn TargetDatabase>,
    cancel: CancellationToken,
}

impl TargetPoller {
    pub fn new(target: Arc<dyn TargetDatabase>, cancel: CancellationToken) -> Self {
        Self { target, cancel }
    }

    /// Planner statistics first, exact counts for whatever they miss.
    async fn refresh_estimated(&self, group: &EntityGroup) -> SweepOutcome {
        let schema = group.shard_name();
        let mut outcome = SweepOutcome::default();
        if self.cancel.is_cancelled() {
            return outcome.cancelled();
        }

        let stats = match self.target.table_statistics(schema).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(
                    "Statistics unavailable for schema {}, counting exactly: {}",
                    schema, e
                );
                return self
                    .refresh_exact(schema, group.entities(), true, outcome)
                    .await;
            }
        };

        let mut missing = Vec::new();
        let now = Utc::now();
        for entity in group.entities() {
            match stats.get(entity.canonical_name()) {
                Some(&rows) => match entity.try_begin_refresh(PollerKind::Target) {
                    Some(guard) => {
                        guard.record_target(rows, true, now);
                        outcome.refreshed += 1;
                    }
                    None => outcome.skipped += 1,
                },
                None => missing.push(Arc::clone(entity)),
            }
        }

        if !missing.is_empty() {
            debug!(
                "{} tables in schema {} have no statistics, counting exactly",
                missing.len(),
                schema
            );
        }
        self.refresh_exact(schema, &missing, true, outcome).await
    }

    /// Count each entity in turn. Counts taken on the fast pass are recorded
    /// with `mark_estimate` set.
    async fn refresh_exact(
        &self,
        schema: &str,
        entities: &[Arc<Entity>],
        mark_estimate: bool,
        mut outcome: SweepOutcome,
    ) -> SweepOutcome {
        let mut unreachable = false;

        for entity in entities {
            let Some(guard) = entity.try_begin_refresh(PollerKind::Target) else {
                outcome.skipped += 1;
                continue;
            };

            if unreachable {
                guard.record_target_failure(Utc::now());
                outcome.failed += 1;
                continue;
            }

            if self.cancel.is_cancelled() {
                return outcome.cancelled();
            }

            match self.target.count_rows(schema, entity.canonical_name()).await {
                Ok(rows) => {
                    guard.record_target(rows, mark_estimate, Utc::now());
                    outcome.refreshed += 1;
                }
                Err(e) => {
                    guard.record_target_failure(Utc::now());
                    outcome.failed += 1;
                    if e.is_connection_failure() {
                        warn!("Target unreachable while counting {}: {}", entity.full_name(), e);
                        unreachable = true;
                    } else {
                        debug!("Target count failed for {}: {}", entity.full_name(), e);
                    }
                }
            }
        }

        if unreachable {
            outcome.status = SweepStatus::Unreachable;
        }
        outcome
    }
}

#[async_trait]
impl Poller for TargetPoller {
    fn kind(&self) -> PollerKind {
        PollerKind::Target
    }

    async fn refresh(&self, group: &EntityGroup, fast: bool) -> SweepOutcome {
        let outcome = if fast {
            self.refresh_estimated(group).await
        } else {
            self.refresh_exact(
                group.shard_name(),
                group.entities(),
                false,
                SweepOutcome::default(),
            )
            .await
        };
        debug!(
            "Target sweep of {} ({}): {:?}",
            group.shard_name(),
            if fast { "estimate" } else { "exact" },
            outcome
        );
        outcome
    }
}
