//! Connectivity check for every configured endpoint.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::{SourceShard, TargetDatabase};
use crate::error::Result;

/// Result of probing one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointHealth {
    /// Shard name, or the target description.
    pub name: String,
    /// `"source"` or `"target"`.
    pub role: String,
    pub connected: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub endpoints: Vec<EndpointHealth>,
    pub healthy: bool,
}

impl HealthCheckResult {
    pub fn failed(&self) -> impl Iterator<Item = &EndpointHealth> {
        self.endpoints.iter().filter(|e| !e.connected)
    }
}

async fn check_endpoint<F>(name: String, role: &str, check: F) -> EndpointHealth
where
    F: std::future::Future<Output = Result<()>>,
{
    let started = Instant::now();
    let outcome = check.await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => {
            info!("{} {} reachable ({}ms)", role, name, latency_ms);
            EndpointHealth {
                name,
                role: role.to_string(),
                connected: true,
                latency_ms,
                error: None,
            }
        }
        Err(e) => {
            warn!("{} {} unreachable: {}", role, name, e);
            EndpointHealth {
                name,
                role: role.to_string(),
                connected: false,
                latency_ms,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Check every shard and the target concurrently.
pub async fn health_check(
    shards: &[Arc<dyn SourceShard>],
    target: &dyn TargetDatabase,
) -> HealthCheckResult {
    let sources = join_all(
        shards
            .iter()
            .map(|s| check_endpoint(s.name().to_string(), "source", s.test_connection())),
    );
    let target = check_endpoint(target.describe(), "target", target.test_connection());
    let (mut endpoints, target) = futures::join!(sources, target);
    endpoints.push(target);

    let healthy = endpoints.iter().all(|e| e.connected);
    HealthCheckResult { endpoints, healthy }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{shard, Failure, FakeShard, FakeTarget};

    #[tokio::test]
    async fn test_all_reachable() {
        let shards = vec![shard(FakeShard::new("shard_a")), shard(FakeShard::new("shard_b"))];
        let result = health_check(&shards, &FakeTarget::new()).await;

        assert!(result.healthy);
        assert_eq!(result.endpoints.len(), 3);
        assert_eq!(result.endpoints[0].name, "shard_a");
        assert_eq!(result.endpoints[2].role, "target");
        assert_eq!(result.failed().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_shard_and_target_reported() {
        let shards = vec![
            shard(FakeShard::new("shard_a").failing_list(Failure::Connection)),
            shard(FakeShard::new("shard_b")),
        ];
        let target = FakeTarget::new();
        target.set_down(true);

        let result = health_check(&shards, &target).await;

        assert!(!result.healthy);
        let failed: Vec<_> = result.failed().map(|e| e.name.as_str()).collect();
        assert_eq!(failed, vec!["shard_a", "fake-pg"]);
        assert!(result.endpoints[0]
            .error
            .as_deref()
            .unwrap()
            .contains("connection refused"));
    }
}
