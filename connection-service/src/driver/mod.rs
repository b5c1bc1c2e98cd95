//! Engine drivers.
//!
//! A [`Driver`] knows how to open physical connections for one database
//! engine, run statements inside a cursor (a transaction on one connection)
//! and introspect a schema. Connection lifecycle and metadata caching live
//! in [`crate::connector`], which is generic over the driver.

mod describe;
pub mod mysql;

use std::time::Duration;

use async_trait::async_trait;
use common::models::{ConnectInfo, QueryResult};

pub use describe::render_table_description;
pub use mysql::MySqlDriver;

/// Structure of one column as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: String,
    pub nullable: bool,
    pub key: String,
    pub default: Option<String>,
    pub extra: String,
    pub comment: String,
}

/// One index and its ordered columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
}

/// Structure of one table as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Unqualified table name.
    pub name: String,
    pub comment: String,
    pub columns: Vec<ColumnSchema>,
    pub indexes: Vec<IndexSchema>,
}

/// Engine-specific physical access.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Handle to a live physical connection (or a small pool of them).
    type Conn: Clone + Send + Sync + 'static;
    /// A statement scope on one connection, committed or rolled back as a unit.
    type Cursor: Send + 'static;

    /// Engine type key, e.g. `mysql`.
    fn engine_type(&self) -> &'static str;

    /// Human-readable engine description.
    fn description(&self) -> &'static str;

    /// Opens a physical connection. One attempt, no retry.
    async fn connect(&self, info: &ConnectInfo) -> Result<Self::Conn, sqlx::Error>;

    /// Closes the connection; idempotent.
    async fn close(&self, conn: &Self::Conn);

    /// Whether the connection reports itself as closed.
    fn is_closed(&self, conn: &Self::Conn) -> bool;

    /// Opens a cursor (begins a transaction) on the connection.
    async fn open_cursor(&self, conn: &Self::Conn) -> Result<Self::Cursor, sqlx::Error>;

    async fn commit(&self, cursor: Self::Cursor) -> Result<(), sqlx::Error>;

    async fn rollback(&self, cursor: Self::Cursor) -> Result<(), sqlx::Error>;

    /// Runs a read statement, keeping at most `limit` rows.
    async fn fetch(
        &self,
        cursor: &mut Self::Cursor,
        sql: &str,
        limit: usize,
    ) -> Result<QueryResult, sqlx::Error>;

    /// Lists every table of `schema` with columns and indexes.
    async fn introspect(
        &self,
        cursor: &mut Self::Cursor,
        schema: &str,
    ) -> Result<Vec<TableSchema>, sqlx::Error>;

    /// Connects with throwaway credentials and runs a trivial statement.
    async fn probe(&self, info: &ConnectInfo, timeout: Duration) -> Result<(), sqlx::Error>;

    /// Whether the error means the connection itself is unusable.
    fn is_connection_error(&self, err: &sqlx::Error) -> bool {
        is_transport_error(err)
    }
}

/// Engine-independent classification of connection-level failures.
///
/// Relies on the structured error variant and on SQLSTATE class `08`
/// (connection exception), never on message text.
pub fn is_transport_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| code.starts_with("08")),
        _ => false,
    }
}
