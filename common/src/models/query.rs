//! SQL query models.
//!
//! Contains models for read-only query execution.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;
/// Upper bound of the query timeout in seconds.
pub const MAX_QUERY_TIMEOUT_SECS: u64 = 600;
/// Default number of rows returned.
pub const DEFAULT_ROW_LIMIT: u32 = 1000;

/// Request body for executing a read query.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QueryRequest {
    /// Id of the registered database.
    #[validate(length(min = 1, message = "Database ID is required"))]
    pub db_id: String,

    /// SQL statement to execute.
    #[validate(length(min = 1, message = "SQL statement is required"))]
    pub sql: String,

    /// Timeout in seconds (1-600, default 60).
    #[serde(default = "default_timeout")]
    #[validate(range(min = 1, max = MAX_QUERY_TIMEOUT_SECS, message = "timeout must be between 1 and 600 seconds"))]
    pub timeout_secs: u64,

    /// Maximum number of rows to return (default: 1000).
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 10000, message = "limit must be between 1 and 10000"))]
    pub limit: u32,
}

fn default_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

fn default_limit() -> u32 {
    DEFAULT_ROW_LIMIT
}

impl QueryRequest {
    /// Creates a request with default timeout and limit.
    pub fn new(db_id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            db_id: db_id.into(),
            sql: sql.into(),
            timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            limit: DEFAULT_ROW_LIMIT,
        }
    }
}

/// Result of a query execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column information.
    pub columns: Vec<ColumnInfo>,

    /// Row data (each row is a vector of JSON values).
    pub rows: Vec<Vec<serde_json::Value>>,

    /// Number of rows returned.
    #[serde(default)]
    pub row_count: usize,

    /// Whether rows beyond the limit were dropped.
    #[serde(default)]
    pub truncated: bool,

    /// Query execution time in milliseconds.
    #[serde(default)]
    pub execution_time_ms: u64,
}

/// Column information in query result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Column data type.
    pub data_type: String,
}

impl QueryResult {
    /// Builds a result, keeping at most `limit` rows.
    pub fn from_rows(
        columns: Vec<ColumnInfo>,
        mut rows: Vec<Vec<serde_json::Value>>,
        limit: usize,
    ) -> Self {
        let truncated = rows.len() > limit;
        rows.truncate(limit);
        Self {
            columns,
            row_count: rows.len(),
            rows,
            truncated,
            execution_time_ms: 0,
        }
    }
}
