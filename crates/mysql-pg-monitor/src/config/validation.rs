//! Configuration validation.

use super::Config;
use crate::drivers::common::SslMode;
use crate::error::{MonitorError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MonitorError::Config("source.host is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MonitorError::Config("source.user is required".into()));
    }
    if config.source.shard_names().is_empty() {
        return Err(MonitorError::Config(
            "source.databases must name at least one shard".into(),
        ));
    }
    if config.source.max_connections == 0 {
        return Err(MonitorError::Config(
            "source.max_connections must be at least 1".into(),
        ));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MonitorError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MonitorError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MonitorError::Config("target.user is required".into()));
    }
    if config.target.max_connections == 0 {
        return Err(MonitorError::Config(
            "target.max_connections must be at least 1".into(),
        ));
    }
    SslMode::parse(&config.target.ssl_mode)?;

    // Monitor validation
    if config.monitor.refresh_interval_secs == 0 {
        return Err(MonitorError::Config(
            "monitor.refresh_interval_secs must be at least 1".into(),
        ));
    }
    if config.monitor.source_refresh_ratio == 0 {
        return Err(MonitorError::Config(
            "monitor.source_refresh_ratio must be at least 1".into(),
        ));
    }
    if config.monitor.history_capacity < 2 {
        return Err(MonitorError::Config(
            "monitor.history_capacity must be at least 2".into(),
        ));
    }
    if config.monitor.throughput_window < 2 {
        return Err(MonitorError::Config(
            "monitor.throughput_window must be at least 2".into(),
        ));
    }

    Ok(())
}
