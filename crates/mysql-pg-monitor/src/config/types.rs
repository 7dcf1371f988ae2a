//! Configuration type definitions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source cluster configuration (MySQL, one database per shard).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL, one schema per shard).
    pub target: TargetConfig,

    /// Polling behavior configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Source cluster (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Shard databases to monitor.
    #[serde(default)]
    pub databases: Vec<String>,

    /// Source tables starting with any of these prefixes are never monitored.
    #[serde(default)]
    pub ignored_table_prefixes: Vec<String>,

    /// Maximum connections per shard pool (default: 4).
    #[serde(default = "default_source_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a shard connection (default: 5).
    #[serde(default = "default_source_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl SourceConfig {
    /// Shard names with blanks and duplicates removed, in configured order.
    pub fn shard_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.databases.len());
        for db in &self.databases {
            let db = db.trim();
            if !db.is_empty() && !names.iter().any(|n| n == db) {
                names.push(db.to_string());
            }
        }
        names
    }

    /// Ignored prefixes with blanks removed.
    pub fn ignored_prefixes(&self) -> Vec<String> {
        self.ignored_table_prefixes
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("databases", &self.databases)
            .field("ignored_table_prefixes", &self.ignored_table_prefixes)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 8).
    #[serde(default = "default_target_connections")]
    pub max_connections: usize,

    /// Seconds to wait for a connection (default: 10).
    #[serde(default = "default_target_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl TargetConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Polling behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between scheduler ticks; every tick refreshes the target.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// The source is refreshed once every this many target refreshes.
    #[serde(default = "default_source_refresh_ratio")]
    pub source_refresh_ratio: u32,

    /// Maximum rows shown by the presentation layer.
    #[serde(default = "default_max_tables_display")]
    pub max_tables_display: usize,

    /// History points kept for throughput estimation.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Most recent history points used for the throughput estimate.
    #[serde(default = "default_throughput_window")]
    pub throughput_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            source_refresh_ratio: default_source_refresh_ratio(),
            max_tables_display: default_max_tables_display(),
            history_capacity: default_history_capacity(),
            throughput_window: default_throughput_window(),
        }
    }
}

/// Validated, typed scheduling parameters consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub refresh_interval: Duration,
    pub source_refresh_ratio: u32,
    pub history_capacity: usize,
    pub throughput_window: usize,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        MonitorConfig::default().settings()
    }
}

impl MonitorConfig {
    /// Convert to engine settings, clamping values the engine cannot work with.
    pub fn settings(&self) -> ScheduleSettings {
        ScheduleSettings {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs.max(1)),
            source_refresh_ratio: self.source_refresh_ratio.max(1),
            history_capacity: self.history_capacity.max(2),
            throughput_window: self.throughput_window.max(2),
        }
    }
}

// Default value functions for serde
fn default_mysql_port() -> u16 {
    3306
}

fn default_pg_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_source_connections() -> u32 {
    4
}

fn default_target_connections() -> usize {
    8
}

fn default_source_connect_timeout() -> u64 {
    5
}

fn default_target_connect_timeout() -> u64 {
    10
}

fn default_refresh_interval() -> u64 {
    3
}

fn default_source_refresh_ratio() -> u32 {
    3
}

fn default_max_tables_display() -> usize {
    50
}

fn default_history_capacity() -> usize {
    120
}

fn default_throughput_window() -> usize {
    10
}
