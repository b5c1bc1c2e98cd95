//! Shared data models.

pub mod database;
pub mod query;
pub mod table;
pub mod user;

// Re-export commonly used types
pub use database::{
    ConnectInfo, CreateDatabaseRequest, Database, DatabaseInfo, DatabasePatch, DatabaseUpdate,
    ShareConfig,
};
pub use query::{ColumnInfo, QueryRequest, QueryResult};
pub use table::{Table, TablePatch};
pub use user::{Role, User};
