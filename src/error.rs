//! Error types for the resilient SQL client.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants are grouped by how the breaker treats them: driver and timeout failures
//! count against a node, while result-level outcomes, locally synthesized rejections
//! and caller misuse never do.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42S02" for an unknown table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    #[error("No rows in result set")]
    NoRows,

    #[error("Circuit breaker is open for {addr}")]
    BreakerOpen { addr: String },

    #[error("Invalid operation: no master to pin, this view is already master-only")]
    NoMaster,

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Transaction has already been committed or rolled back")]
    TxDone,

    #[error("Statement is closed")]
    StmtClosed,

    #[error("Connection pool is closed")]
    Closed,

    #[error("Failed to close statement on {} node(s): {}", .failures.len(), describe_failures(.failures))]
    StmtClose { failures: Vec<(String, DbError)> },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Create a breaker-open error for the given node address.
    pub fn breaker_open(addr: impl Into<String>) -> Self {
        Self::BreakerOpen { addr: addr.into() }
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::BreakerOpen { .. }
        )
    }

    /// True when the query simply matched nothing.
    pub fn is_no_rows(&self) -> bool {
        matches!(self, Self::NoRows)
    }

    /// True when the call was rejected locally by a node's breaker.
    pub fn is_breaker_open(&self) -> bool {
        matches!(self, Self::BreakerOpen { .. })
    }

    /// True for caller bugs such as re-pinning a master-only view.
    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, Self::NoMaster | Self::InvalidOperation { .. })
    }

    /// Whether a node's breaker should record this outcome as a failure.
    ///
    /// Only errors produced by the driver or by an expired deadline count.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Database { .. }
                | Self::Timeout { .. }
                | Self::Internal { .. }
        )
    }

    /// True when a failure means the connection behind a cached handle is suspect.
    pub(crate) fn invalidates_handle(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

fn describe_failures(failures: &[(String, DbError)]) -> String {
    failures
        .iter()
        .map(|(addr, err)| format!("{addr}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the DSN format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let message = match db_err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
                    Some(mysql_err) => format!("{} ({})", db_err.message(), mysql_err.number()),
                    None => db_err.message().to_string(),
                };
                DbError::database(
                    message,
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::NoRows,
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection from the pool",
                "Raise max_open_conn or shorten long-running operations",
            ),
            sqlx::Error::PoolClosed => DbError::Closed,
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::invalid_input(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::invalid_input(
                format!("Column index {} out of bounds (len: {})", index, len),
            ),
            sqlx::Error::ColumnDecode { index, source } => DbError::invalid_input(format!(
                "Failed to decode column {}: {}",
                index, source
            )),
            sqlx::Error::Decode(source) => {
                DbError::invalid_input(format!("Decode error: {}", source))
            }
            sqlx::Error::AnyDriverError(err) => DbError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42000".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DbError::NoRows.suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", Duration::from_secs(30)).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(DbError::breaker_open("127.0.0.1:3306").is_retryable());
        assert!(!DbError::NoMaster.is_retryable());
    }

    #[test]
    fn test_breaker_classification() {
        assert!(DbError::connection("reset", "retry").counts_as_failure());
        assert!(DbError::timeout("exec", Duration::from_millis(5)).counts_as_failure());
        assert!(DbError::database("no such table", None, "").counts_as_failure());

        assert!(!DbError::NoRows.counts_as_failure());
        assert!(!DbError::TxDone.counts_as_failure());
        assert!(!DbError::Closed.counts_as_failure());
        assert!(!DbError::breaker_open("a:1").counts_as_failure());
        assert!(!DbError::NoMaster.counts_as_failure());
    }

    #[test]
    fn test_row_not_found_maps_to_no_rows() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(err.is_no_rows());
    }

    #[test]
    fn test_pool_closed_maps_to_closed() {
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::Closed));
    }

    #[test]
    fn test_misuse_is_invalid_operation() {
        assert!(DbError::NoMaster.is_invalid_operation());
        assert!(DbError::invalid_operation("wrong tx").is_invalid_operation());
        assert!(!DbError::TxDone.is_invalid_operation());
    }

    #[test]
    fn test_handle_invalidation() {
        assert!(DbError::connection("reset", "retry").invalidates_handle());
        assert!(DbError::timeout("stmt_query", Duration::from_millis(5)).invalidates_handle());
        assert!(!DbError::database("duplicate key", Some("23000".to_string()), "").invalidates_handle());
        assert!(!DbError::NoRows.invalidates_handle());
    }

    #[test]
    fn test_stmt_close_lists_every_failure() {
        let err = DbError::StmtClose {
            failures: vec![
                (
                    "10.0.0.1:3306".to_string(),
                    DbError::timeout("statement close", Duration::from_secs(1)),
                ),
                ("10.0.0.2:3306".to_string(), DbError::Closed),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 node(s)"));
        assert!(msg.contains("10.0.0.1:3306"));
        assert!(msg.contains("10.0.0.2:3306"));
    }
}
