//! Core types shared by the registry, pollers and aggregator.
//!
//! - [`normalize`]: physical source name to canonical target name
//! - [`entity`]: monitored entities, refresh guards and snapshots
//! - [`traits`]: source and target backend seams
//! - [`identifier`]: identifier quoting for dynamically built statements

pub mod entity;
pub mod identifier;
pub mod normalize;
pub mod traits;

pub use entity::{Entity, EntitySnapshot, PollerKind, RefreshGuard, ERROR_COUNT};
pub use normalize::normalize;
pub use traits::{CountHint, SourceShard, TargetDatabase};
