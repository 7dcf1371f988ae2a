//! One MySQL source shard over a lazily connected SQLx pool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::mysql::{
    MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode,
};
use sqlx::Row;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::core::identifier::{qualify_mysql, validate_identifier};
use crate::core::{CountHint, SourceShard};
use crate::error::{MonitorError, Result};

/// MySQL error numbers that mean the server or account is unusable rather
/// than the statement being wrong.
const CONNECTION_ERROR_NUMBERS: &[u16] = &[
    1040, // ER_CON_COUNT_ERROR
    1044, // ER_DBACCESS_DENIED_ERROR
    1045, // ER_ACCESS_DENIED_ERROR
    1049, // ER_BAD_DB_ERROR
    1053, // ER_SERVER_SHUTDOWN
    1129, // ER_HOST_IS_BLOCKED
    1130, // ER_HOST_NOT_PRIVILEGED
];

/// A source shard: one database on the MySQL server.
pub struct MysqlShard {
    name: String,
    pool: MySqlPool,
}

impl MysqlShard {
    /// Build a shard handle. No connection is opened until the first query.
    pub fn connect_lazy(config: &SourceConfig, database: &str) -> Result<Self> {
        validate_identifier(database)?;

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(database)
            .ssl_mode(MySqlSslMode::Preferred);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_lazy_with(options);

        debug!(
            "Prepared MySQL pool for shard {} at {}:{}",
            database, config.host, config.port
        );

        Ok(Self {
            name: database.to_string(),
            pool,
        })
    }

    fn count_statement(&self, table: &str, hint: CountHint) -> Result<String> {
        let qualified = qualify_mysql(&self.name, table)?;
        Ok(match hint {
            CountHint::PrimaryKey => {
                format!("SELECT COUNT(*) AS cnt FROM {} USE INDEX (PRIMARY)", qualified)
            }
            CountHint::None => format!("SELECT COUNT(*) AS cnt FROM {}", qualified),
        })
    }

    /// Map an SQLx error to a connection or query failure.
    fn classify(&self, err: sqlx::Error, table: Option<&str>) -> MonitorError {
        if is_query_error(&err) {
            let table = match table {
                Some(t) => format!("{}.{}", self.name, t),
                None => self.name.clone(),
            };
            MonitorError::query(table, err)
        } else {
            MonitorError::connection(format!("mysql:{}", self.name), err)
        }
    }
}

fn is_query_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .map_or(true, |e| !CONNECTION_ERROR_NUMBERS.contains(&e.number())),
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => true,
        _ => false,
    }
}

#[async_trait]
impl SourceShard for MysqlShard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_base_tables(&self) -> Result<Vec<String>> {
        // information_schema may return VARBINARY under some collations
        let query = r#"
            SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.classify(e, None))?;

        let tables = rows
            .iter()
            .map(|row| row.try_get::<String, _>("TABLE_NAME"))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| self.classify(e, None))?;

        info!("Shard {}: {} base tables", self.name, tables.len());
        Ok(tables)
    }

    async fn approximate_row_counts(&self) -> Result<HashMap<String, i64>> {
        let query = r#"
            SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME,
                   CAST(COALESCE(TABLE_ROWS, 0) AS SIGNED) AS TABLE_ROWS
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.classify(e, None))?;

        let mut estimates = HashMap::with_capacity(rows.len());
        for row in rows {
            let table: String = row
                .try_get("TABLE_NAME")
                .map_err(|e| self.classify(e, None))?;
            let estimate: i64 = row
                .try_get("TABLE_ROWS")
                .map_err(|e| self.classify(e, Some(&table)))?;
            estimates.insert(table, estimate);
        }
        Ok(estimates)
    }

    async fn count_rows(&self, table: &str, hint: CountHint) -> Result<i64> {
        let statement = self.count_statement(table, hint)?;
        let row: MySqlRow = sqlx::query(&statement)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.classify(e, Some(table)))?;
        row.try_get::<i64, _>("cnt")
            .map_err(|e| self.classify(e, Some(table)))
    }

    async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| self.classify(e, None))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Build one lazily connected shard per configured database.
pub fn connect_shards(config: &SourceConfig) -> Result<Vec<Arc<dyn SourceShard>>> {
    config
        .shard_names()
        .iter()
        .map(|db| Ok(Arc::new(MysqlShard::connect_lazy(config, db)?) as Arc<dyn SourceShard>))
        .collect()
}
