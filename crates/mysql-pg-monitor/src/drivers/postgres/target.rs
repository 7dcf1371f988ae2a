//! The consolidated PostgreSQL target over a deadpool-postgres pool.

use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod};
use tokio_postgres::Config as PgConfig;
use tracing::{debug, warn};

use crate::config::TargetConfig;
use crate::core::identifier::qualify_pg;
use crate::core::TargetDatabase;
use crate::drivers::common::TlsBuilder;
use crate::error::{MonitorError, Result};

/// SQLSTATEs outside classes 08 and 28 that still mean the server is unusable.
const CONNECTION_SQLSTATES: &[&str] = &["3D000", "53300", "57P01", "57P02", "57P03"];

const STATISTICS_QUERY: &str = r#"
    SELECT relname::text AS relname, n_live_tup
    FROM pg_stat_user_tables
    WHERE schemaname = $1
"#;

/// PostgreSQL target database.
pub struct PgTarget {
    pool: Pool,
    endpoint: String,
}

impl PgTarget {
    /// Build the pool. Connections are opened on first use.
    pub fn new(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.connect_timeout(config.connect_timeout());
        pg_config.application_name("mysql-pg-monitor");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match TlsBuilder::parse(&config.ssl_mode)?.build()? {
            Some(tls) => {
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr).max_size(config.max_connections).build()
            }
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr).max_size(config.max_connections).build()
            }
        }
        .map_err(|e| MonitorError::Config(format!("Failed to create target pool: {}", e)))?;

        let endpoint = format!("{}:{}/{}", config.host, config.port, config.database);
        debug!("Prepared PostgreSQL pool for {}", endpoint);

        Ok(Self { pool, endpoint })
    }

    async fn client(&self) -> Result<Object> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Backend(e) => self.classify(e, None),
            other => MonitorError::connection(&self.endpoint, other),
        })
    }

    fn classify(&self, err: tokio_postgres::Error, table: Option<&str>) -> MonitorError {
        match (is_query_error(&err), table) {
            (true, Some(table)) => MonitorError::query(table, err),
            (true, None) => MonitorError::query(&self.endpoint, err),
            (false, _) => MonitorError::connection(&self.endpoint, err),
        }
    }
}

fn is_query_error(err: &tokio_postgres::Error) -> bool {
    match err.as_db_error() {
        Some(db) => {
            let code = db.code().code();
            !(code.starts_with("08")
                || code.starts_with("28")
                || CONNECTION_SQLSTATES.contains(&code))
        }
        None => false,
    }
}

#[async_trait]
impl TargetDatabase for PgTarget {
    async fn table_statistics(&self, schema: &str) -> Result<HashMap<String, i64>> {
        let client = self.client().await?;
        let rows = client
            .query(STATISTICS_QUERY, &[&schema])
            .await
            .map_err(|e| self.classify(e, Some(schema)))?;

        let mut stats = HashMap::with_capacity(rows.len());
        for row in rows {
            let table: String = row
                .try_get(0)
                .map_err(|e| self.classify(e, Some(schema)))?;
            let live: i64 = row
                .try_get(1)
                .map_err(|e| self.classify(e, Some(schema)))?;
            stats.insert(table, live);
        }
        Ok(stats)
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64> {
        let qualified = qualify_pg(schema, table)?;
        let client = self.client().await?;
        let row = client
            .query_one(&format!("SELECT COUNT(*) FROM {}", qualified), &[])
            .await
            .map_err(|e| self.classify(e, Some(&qualified)))?;
        row.try_get(0).map_err(|e| self.classify(e, Some(&qualified)))
    }

    async fn test_connection(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| self.classify(e, None))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }

    async fn close(&self) {
        self.pool.close();
    }
}
