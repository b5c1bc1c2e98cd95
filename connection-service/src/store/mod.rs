//! Durable persistence of database and table metadata.
//!
//! Connectors and the manager only see the repository traits; the concrete
//! backend is chosen at the composition root.

mod memory;
mod mysql;

use std::sync::Arc;

use async_trait::async_trait;
use common::errors::AppResult;
use common::models::{Database, DatabasePatch, Table, TablePatch};

pub use memory::InMemoryMetadataStore;
pub use mysql::MySqlMetadataStore;

/// Persistence of registered databases.
#[async_trait]
pub trait DatabaseRepository: Send + Sync {
    async fn get_all(&self) -> AppResult<Vec<Database>>;

    async fn get_by_id(&self, db_id: &str) -> AppResult<Option<Database>>;

    async fn create(&self, database: &Database) -> AppResult<Database>;

    /// Applies the patch; `None` when the record does not exist.
    async fn update(&self, db_id: &str, patch: DatabasePatch) -> AppResult<Option<Database>>;

    /// Deletes the record and, by cascade, its tables. Absent ids are ignored.
    async fn delete(&self, db_id: &str) -> AppResult<()>;
}

/// Persistence of introspected tables.
#[async_trait]
pub trait TableRepository: Send + Sync {
    async fn get_all(&self) -> AppResult<Vec<Table>>;

    async fn list_by_database(&self, db_id: &str) -> AppResult<Vec<Table>>;

    async fn get_by_id(&self, table_id: &str) -> AppResult<Option<Table>>;

    async fn create(&self, table: &Table) -> AppResult<Table>;

    /// Applies the patch; `None` when the record does not exist.
    async fn update(&self, table_id: &str, patch: TablePatch) -> AppResult<Option<Table>>;

    /// Creates the record or overwrites every field of the existing one.
    async fn upsert(&self, table: &Table) -> AppResult<Table>;

    /// Absent ids are ignored.
    async fn delete(&self, table_id: &str) -> AppResult<()>;

    async fn delete_by_database(&self, db_id: &str) -> AppResult<()>;
}

/// The repository pair handed to connectors and the manager.
#[derive(Clone)]
pub struct MetadataStore {
    pub databases: Arc<dyn DatabaseRepository>,
    pub tables: Arc<dyn TableRepository>,
}

impl MetadataStore {
    pub fn new(databases: Arc<dyn DatabaseRepository>, tables: Arc<dyn TableRepository>) -> Self {
        Self { databases, tables }
    }

    /// A process-local store backed by [`InMemoryMetadataStore`].
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryMetadataStore::new());
        Self::new(store.clone(), store)
    }

    /// A store persisted in MySQL; creates its tables when missing.
    pub async fn mysql(pool: sqlx::MySqlPool) -> AppResult<Self> {
        let store = Arc::new(MySqlMetadataStore::new(pool).await?);
        Ok(Self::new(store.clone(), store))
    }
}
