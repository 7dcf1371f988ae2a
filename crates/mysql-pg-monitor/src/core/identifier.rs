//! Identifier validation and quoting for dynamically built COUNT statements.
//!
//! Table names come from the source catalog and cannot be bound as statement
//! parameters, so every name is validated and quoted before it is spliced
//! into SQL:
//! 1. Reject suspicious identifiers (empty, null bytes, excessive length)
//! 2. Apply database-specific quoting (double quotes, backticks)
//! 3. Escape the quote character inside the name

use crate::error::{MonitorError, Result};

/// Maximum identifier length (conservative limit across databases).
/// - PostgreSQL: 63 bytes
/// - MySQL: 64 characters
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// # Errors
///
/// Returns `MonitorError::Config` for invalid identifiers with a descriptive message.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MonitorError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MonitorError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MonitorError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a MySQL identifier using backticks.
///
/// ```ignore
/// assert_eq!(quote_mysql("users")?, "`users`");
/// assert_eq!(quote_mysql("table`name")?, "`table``name`");
/// ```
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Qualify a MySQL table name with its database.
pub fn qualify_mysql(database: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mysql(database)?, quote_mysql(table)?))
}
