//! Error types shared by every component.
//!
//! The core never formats user-facing prose: callers (tool layer, operators)
//! translate these structured values into diagnostics.

use thiserror::Error;

/// Result alias used across the workspace.
pub type AppResult<T> = Result<T, AppError>;

/// Errors raised by the connection and metadata lifecycle manager.
#[derive(Debug, Error)]
pub enum AppError {
    /// The database id is not registered.
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    /// No connector is registered for the engine type.
    #[error("unsupported database engine `{engine}` (available: {available})")]
    UnsupportedEngine { engine: String, available: String },

    /// A physical connection could not be created after exhausting retries.
    #[error("connection to database {db_id} failed after {attempts} attempt(s): {source}")]
    ConnectionFailed {
        db_id: String,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// The query exceeded the caller-supplied timeout.
    #[error("query timed out after {0} ms")]
    QueryTimeout(u128),

    /// The table id is absent from the connector cache.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Required connection fields are missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A database with the same (case-insensitive) name already exists.
    #[error("database name already exists: {0}")]
    DuplicateName(String),

    /// Request payload failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The user may not access the database.
    #[error("access denied to database {0}")]
    AccessDenied(String),

    /// Engine-level error raised while executing a statement.
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// The durable metadata store rejected an operation.
    #[error("metadata store error: {0}")]
    MetadataStore(String),

    /// Working-directory I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Returns the stable error code used by callers for dispatch.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::DatabaseNotFound(_) => "DATABASE_NOT_FOUND",
            AppError::UnsupportedEngine { .. } => "UNSUPPORTED_ENGINE",
            AppError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            AppError::QueryTimeout(_) => "QUERY_TIMEOUT",
            AppError::TableNotFound(_) => "TABLE_NOT_FOUND",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::DuplicateName(_) => "DUPLICATE_NAME",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::AccessDenied(_) => "ACCESS_DENIED",
            AppError::Query(_) => "QUERY_ERROR",
            AppError::MetadataStore(_) => "METADATA_STORE_ERROR",
            AppError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the error denotes an absent entity rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::DatabaseNotFound(_) | AppError::TableNotFound(_))
    }

    /// Wraps a metadata store failure.
    pub fn store(err: impl std::fmt::Display) -> Self {
        AppError::MetadataStore(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}
