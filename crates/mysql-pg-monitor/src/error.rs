//! Error types for the monitor library.

use thiserror::Error;

/// Main error type for monitoring operations.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A shard or the target could not be reached
    #[error("Connection failed for {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    /// A specific query (usually a COUNT) was rejected
    #[error("Query failed for {table}: {message}")]
    Query { table: String, message: String },

    /// Every configured shard failed during discovery
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Discovery finished but found nothing to monitor
    #[error("No tables discovered - check source.databases and ignored_table_prefixes")]
    NoEntities,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Monitoring was cancelled (SIGINT, etc.)
    #[error("Monitoring cancelled")]
    Cancelled,
}

impl MonitorError {
    /// Create a Connection error for an endpoint (shard name or target description).
    pub fn connection(endpoint: impl Into<String>, message: impl ToString) -> Self {
        MonitorError::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a Query error for a table.
    pub fn query(table: impl Into<String>, message: impl ToString) -> Self {
        MonitorError::Query {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// True when the error means the endpoint itself is unreachable, as opposed
    /// to a single statement being rejected.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, MonitorError::Connection { .. } | MonitorError::Io(_))
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MonitorError::Config(_) | MonitorError::Yaml(_) => 2,
            MonitorError::Connection { .. }
            | MonitorError::Discovery(_)
            | MonitorError::NoEntities => 3,
            MonitorError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
