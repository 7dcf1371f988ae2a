//! Database drivers implementing the backend traits.
//!
//! - [`mysql`]: source shards ([`SourceShard`](crate::core::SourceShard))
//! - [`postgres`]: the target ([`TargetDatabase`](crate::core::TargetDatabase))
//! - [`common`]: shared TLS configuration

pub mod common;
pub mod mysql;
pub mod postgres;

pub use common::{SslMode, TlsBuilder};
pub use mysql::{connect_shards, MysqlShard};
pub use postgres::PgTarget;
