//! Row-count refresh sweeps.
//!
//! A sweep refreshes one kind of counts for every entity of one shard. The
//! two implementations share the same contract:
//!
//! - an entity whose refresh of this kind is already in flight is skipped
//! - counts are written once per entity, after all its queries finished
//! - cancellation is checked before every network call
//! - a connection-class failure marks the rest of the sweep as errors
//!   without issuing further queries

mod source;
mod target;

pub use source::SourcePoller;
pub use target::TargetPoller;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::PollerKind;
use crate::registry::EntityGroup;

/// How a sweep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    #[default]
    Completed,
    /// The cancellation token fired mid-sweep.
    Cancelled,
    /// The backend stopped answering; remaining entities were marked as errors.
    Unreachable,
}

/// Result of one sweep over one shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    pub status: SweepStatus,
    /// Entities that received a count.
    pub refreshed: usize,
    /// Entities skipped because another refresh held them.
    pub skipped: usize,
    /// Entities that were recorded as errors.
    pub failed: usize,
}

impl SweepOutcome {
    fn cancelled(mut self) -> Self {
        self.status = SweepStatus::Cancelled;
        self
    }
}

/// Refreshes one kind of counts for a group of entities.
#[async_trait]
pub trait Poller: Send + Sync {
    fn kind(&self) -> PollerKind;

    /// Run one sweep over `group`.
    ///
    /// `fast` selects the cheap estimate path used on the first pass.
    async fn refresh(&self, group: &EntityGroup, fast: bool) -> SweepOutcome;
}
