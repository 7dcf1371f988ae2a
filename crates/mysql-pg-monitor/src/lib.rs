//! # mysql-pg-monitor
//!
//! Row-count consistency monitor for sharded MySQL to PostgreSQL CDC
//! migrations.
//!
//! Each MySQL database (shard) is replicated into a PostgreSQL schema of the
//! same name, with physically sharded tables (`orders_runtime`,
//! `orders_333367878`, ...) rolled up into one target table. This library
//! keeps the row counts of both sides fresh and derives:
//!
//! - **Drift** between source and target per table, shard and overall
//! - **Velocity** of the target from a bounded history of totals
//! - **ETA** until the target catches up
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mysql_pg_monitor::{discover, drivers, Config, Scheduler};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mysql_pg_monitor::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let shards = drivers::connect_shards(&config.source)?;
//!     let target = Arc::new(drivers::PgTarget::new(&config.target)?);
//!     let registry = discover(shards, &config.source.ignored_prefixes()).await?;
//!
//!     let cancel = CancellationToken::new();
//!     let scheduler = Scheduler::new(Arc::new(registry), target, config.settings(), cancel);
//!     let mut snapshots = scheduler.subscribe();
//!     tokio::spawn(scheduler.run());
//!
//!     while snapshots.changed().await.is_ok() {
//!         let snapshot = snapshots.borrow_and_update().clone();
//!         println!("drift: {}", snapshot.summary.drift);
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod health;
pub mod poller;
pub mod registry;
pub mod scheduler;

#[cfg(test)]
mod test_support;

// Re-exports for convenient access
pub use aggregate::{rank, summarize, Eta, History, HistoryPoint, ShardSummary, Summary};
pub use config::{Config, MonitorConfig, ScheduleSettings, SourceConfig, TargetConfig};
pub use core::{normalize, Entity, EntitySnapshot, PollerKind, ERROR_COUNT};
pub use error::{MonitorError, Result};
pub use health::{health_check, EndpointHealth, HealthCheckResult};
pub use poller::{Poller, SourcePoller, SweepOutcome, SweepStatus, TargetPoller};
pub use registry::{discover, EntityGroup, Registry, ShardDiagnostic};
pub use scheduler::{EngineState, MonitorSnapshot, Scheduler};
