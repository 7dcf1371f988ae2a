//! Entity discovery.
//!
//! Discovery runs once per session: every shard's base tables are listed,
//! ignored prefixes are dropped, and the remaining names are grouped by their
//! normalized form. Each group becomes one [`Entity`]. Membership is fixed
//! from then on; tables created later are not picked up until restart.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{normalize, Entity, EntitySnapshot, SourceShard};
use crate::error::{MonitorError, Result};

/// A shard and the entities discovered in it.
pub struct EntityGroup {
    shard: Arc<dyn SourceShard>,
    entities: Vec<Arc<Entity>>,
}

impl EntityGroup {
    pub fn shard(&self) -> &Arc<dyn SourceShard> {
        &self.shard
    }

    /// Shard name, which is also the target schema.
    pub fn shard_name(&self) -> &str {
        self.shard.name()
    }

    pub fn entities(&self) -> &[Arc<Entity>] {
        &self.entities
    }
}

impl std::fmt::Debug for EntityGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityGroup")
            .field("shard", &self.shard_name())
            .field("entities", &self.entities.len())
            .finish()
    }
}

/// A shard that could not be listed during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardDiagnostic {
    pub shard: String,
    pub error: String,
}

/// Every entity under monitoring, grouped by shard.
#[derive(Debug)]
pub struct Registry {
    groups: Vec<Arc<EntityGroup>>,
    diagnostics: Vec<ShardDiagnostic>,
}

impl Registry {
    /// Groups in configuration order. Only shards that were reachable and had
    /// at least one monitored table appear.
    pub fn groups(&self) -> &[Arc<EntityGroup>] {
        &self.groups
    }

    pub fn diagnostics(&self) -> &[ShardDiagnostic] {
        &self.diagnostics
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.groups.iter().flat_map(|g| g.entities.iter())
    }

    pub fn entity_count(&self) -> usize {
        self.groups.iter().map(|g| g.entities.len()).sum()
    }

    pub fn snapshots(&self) -> Vec<EntitySnapshot> {
        self.entities().map(|e| e.snapshot()).collect()
    }
}

/// Discover entities across `shards`.
///
/// Shards are listed concurrently. A shard whose listing fails is recorded
/// as a [`ShardDiagnostic`] and skipped.
///
/// # Errors
///
/// - `MonitorError::Config` if `shards` is empty
/// - `MonitorError::Discovery` if every shard failed
/// - `MonitorError::NoEntities` if nothing was left to monitor
pub async fn discover(
    shards: Vec<Arc<dyn SourceShard>>,
    ignored_prefixes: &[String],
) -> Result<Registry> {
    if shards.is_empty() {
        return Err(MonitorError::Config(
            "at least one source database is required".into(),
        ));
    }

    let prefixes: Vec<&str> = ignored_prefixes
        .iter()
        .map(|p| p.as_str())
        .filter(|p| !p.trim().is_empty())
        .collect();

    let shard_count = shards.len();
    let listings = join_all(shards.iter().map(|s| s.list_base_tables())).await;

    let mut groups = Vec::new();
    let mut diagnostics = Vec::new();

    for (shard, listing) in shards.into_iter().zip(listings) {
        let tables = match listing {
            Ok(tables) => tables,
            Err(e) => {
                warn!("Skipping shard {}: {}", shard.name(), e);
                diagnostics.push(ShardDiagnostic {
                    shard: shard.name().to_string(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        let entities = group_tables(shard.name(), tables, &prefixes);
        if entities.is_empty() {
            info!("Shard {} has no tables to monitor", shard.name());
            continue;
        }

        debug!(
            "Shard {}: {} entities from {} tables",
            shard.name(),
            entities.len(),
            entities.iter().map(|e| e.source_members().len()).sum::<usize>()
        );
        groups.push(Arc::new(EntityGroup { shard, entities }));
    }

    if diagnostics.len() == shard_count {
        let detail = diagnostics
            .iter()
            .map(|d| format!("{}: {}", d.shard, d.error))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(MonitorError::Discovery(detail));
    }

    let registry = Registry {
        groups,
        diagnostics,
    };

    if registry.entity_count() == 0 {
        return Err(MonitorError::NoEntities);
    }

    info!(
        "Discovered {} entities across {} shards",
        registry.entity_count(),
        registry.groups.len()
    );
    Ok(registry)
}

/// Group one shard's tables by canonical name, preserving listing order.
fn group_tables(shard: &str, tables: Vec<String>, prefixes: &[&str]) -> Vec<Arc<Entity>> {
    let mut order: Vec<(String, Vec<String>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for table in tables {
        if prefixes.iter().any(|p| table.starts_with(p)) {
            continue;
        }
        let canonical = normalize(&table);
        match index.get(&canonical) {
            Some(&i) => order[i].1.push(table),
            None => {
                index.insert(canonical.clone(), order.len());
                order.push((canonical, vec![table]));
            }
        }
    }

    order
        .into_iter()
        .map(|(canonical, members)| Arc::new(Entity::new(shard, canonical, members)))
        .collect()
}
