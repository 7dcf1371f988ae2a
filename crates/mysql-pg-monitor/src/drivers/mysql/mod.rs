//! MySQL source driver.
//!
//! Each configured database is one shard with its own SQLx pool. Pools are
//! created lazily so an unreachable shard does not block startup; the first
//! query surfaces the failure as `MonitorError::Connection`.
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

mod shard;

pub use shard::{connect_shards, MysqlShard};
