//! PostgreSQL target driver.
//!
//! The target holds one schema per source shard; each schema contains one
//! table per monitored entity.

mod target;

pub use target::PgTarget;
