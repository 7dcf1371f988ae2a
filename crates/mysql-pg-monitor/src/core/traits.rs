//! Backend seams used by the polling engine.
//!
//! - [`SourceShard`]: one MySQL database (shard) of the source cluster
//! - [`TargetDatabase`]: the consolidated PostgreSQL target, one schema per shard
//!
//! The registry, pollers and scheduler only ever see these traits, so the
//! engine can be driven by in-memory fakes in tests. Implementations must
//! classify failures: an unreachable endpoint is `MonitorError::Connection`,
//! a rejected statement is `MonitorError::Query`.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

/// Index hint for an exact source count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountHint {
    /// Force the primary key index (`USE INDEX (PRIMARY)`).
    PrimaryKey,
    /// Let the optimizer choose.
    None,
}

/// One source shard (a MySQL database).
#[async_trait]
pub trait SourceShard: Send + Sync {
    /// Database name of the shard. Also the target schema name.
    fn name(&self) -> &str;

    /// Base tables of the shard, ordered by name. Views are excluded.
    async fn list_base_tables(&self) -> Result<Vec<String>>;

    /// Catalog row estimates for every base table of the shard, keyed by
    /// physical table name.
    async fn approximate_row_counts(&self) -> Result<HashMap<String, i64>>;

    /// Exact `COUNT(*)` of one physical table.
    async fn count_rows(&self, table: &str, hint: CountHint) -> Result<i64>;

    /// Round-trip a trivial statement.
    async fn test_connection(&self) -> Result<()>;

    /// Release pooled connections.
    async fn close(&self);
}

/// The consolidated target database.
#[async_trait]
pub trait TargetDatabase: Send + Sync {
    /// Planner statistics (live tuple estimates) for every table of `schema`.
    async fn table_statistics(&self, schema: &str) -> Result<HashMap<String, i64>>;

    /// Exact `COUNT(*)` of `schema.table`.
    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64>;

    async fn test_connection(&self) -> Result<()>;

    /// Human-readable endpoint description without credentials.
    fn describe(&self) -> String;

    async fn close(&self);
}
