//! In-process metadata store.
//!
//! Mirrors the relational store's constraints: a table must reference an
//! existing database and deleting a database cascades to its tables.

use std::collections::HashMap;

use async_trait::async_trait;
use common::errors::{AppError, AppResult};
use common::models::{Database, DatabasePatch, Table, TablePatch};
use tokio::sync::RwLock;

use super::{DatabaseRepository, TableRepository};

#[derive(Default)]
pub struct InMemoryMetadataStore {
    databases: RwLock<HashMap<String, Database>>,
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn ensure_database(&self, db_id: &str) -> AppResult<()> {
        if self.databases.read().await.contains_key(db_id) {
            Ok(())
        } else {
            Err(AppError::store(format!(
                "foreign key violation: database {db_id} does not exist"
            )))
        }
    }
}

#[async_trait]
impl DatabaseRepository for InMemoryMetadataStore {
    async fn get_all(&self) -> AppResult<Vec<Database>> {
        let mut all: Vec<Database> = self.databases.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn get_by_id(&self, db_id: &str) -> AppResult<Option<Database>> {
        Ok(self.databases.read().await.get(db_id).cloned())
    }

    async fn create(&self, database: &Database) -> AppResult<Database> {
        let mut databases = self.databases.write().await;
        if databases.contains_key(&database.db_id) {
            return Err(AppError::store(format!(
                "duplicate key: database {} already exists",
                database.db_id
            )));
        }
        databases.insert(database.db_id.clone(), database.clone());
        Ok(database.clone())
    }

    async fn update(&self, db_id: &str, patch: DatabasePatch) -> AppResult<Option<Database>> {
        let mut databases = self.databases.write().await;
        Ok(databases.get_mut(db_id).map(|database| {
            patch.apply(database);
            database.clone()
        }))
    }

    async fn delete(&self, db_id: &str) -> AppResult<()> {
        // Lock order: databases, then tables
        let mut databases = self.databases.write().await;
        if databases.remove(db_id).is_some() {
            self.tables
                .write()
                .await
                .retain(|_, table| table.database_id != db_id);
        }
        Ok(())
    }
}

#[async_trait]
impl TableRepository for InMemoryMetadataStore {
    async fn get_all(&self) -> AppResult<Vec<Table>> {
        Ok(self.tables.read().await.values().cloned().collect())
    }

    async fn list_by_database(&self, db_id: &str) -> AppResult<Vec<Table>> {
        Ok(self
            .tables
            .read()
            .await
            .values()
            .filter(|table| table.database_id == db_id)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, table_id: &str) -> AppResult<Option<Table>> {
        Ok(self.tables.read().await.get(table_id).cloned())
    }

    async fn create(&self, table: &Table) -> AppResult<Table> {
        self.ensure_database(&table.database_id).await?;
        let mut tables = self.tables.write().await;
        if tables.contains_key(&table.table_id) {
            return Err(AppError::store(format!(
                "duplicate key: table {} already exists",
                table.table_id
            )));
        }
        tables.insert(table.table_id.clone(), table.clone());
        Ok(table.clone())
    }

    async fn update(&self, table_id: &str, patch: TablePatch) -> AppResult<Option<Table>> {
        let mut tables = self.tables.write().await;
        Ok(tables.get_mut(table_id).map(|table| {
            patch.apply(table);
            table.clone()
        }))
    }

    async fn upsert(&self, table: &Table) -> AppResult<Table> {
        self.ensure_database(&table.database_id).await?;
        self.tables
            .write()
            .await
            .insert(table.table_id.clone(), table.clone());
        Ok(table.clone())
    }

    async fn delete(&self, table_id: &str) -> AppResult<()> {
        self.tables.write().await.remove(table_id);
        Ok(())
    }

    async fn delete_by_database(&self, db_id: &str) -> AppResult<()> {
        self.tables
            .write()
            .await
            .retain(|_, table| table.database_id != db_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::models::{ConnectInfo, ShareConfig};

    fn database(db_id: &str) -> Database {
        Database {
            db_id: db_id.into(),
            name: db_id.into(),
            description: String::new(),
            engine_type: "mysql".into(),
            connect_info: ConnectInfo::default(),
            share_config: ShareConfig::default(),
            related_db_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn table(table_id: &str, db_id: &str) -> Table {
        Table {
            table_id: table_id.into(),
            database_id: db_id.into(),
            tablename: format!("s.{table_id}"),
            description: String::new(),
            total_description: String::new(),
            is_choose: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_table_requires_database() {
        let store = InMemoryMetadataStore::new();
        let err = TableRepository::upsert(&store, &table("t1", "db_missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MetadataStore(_)));
    }

    #[tokio::test]
    async fn test_delete_database_cascades() {
        let store = InMemoryMetadataStore::new();
        DatabaseRepository::create(&store, &database("db_a")).await.unwrap();
        DatabaseRepository::create(&store, &database("db_b")).await.unwrap();
        TableRepository::create(&store, &table("t1", "db_a")).await.unwrap();
        TableRepository::create(&store, &table("t2", "db_b")).await.unwrap();

        DatabaseRepository::delete(&store, "db_a").await.unwrap();

        let remaining = TableRepository::get_all(&store).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].table_id, "t2");
    }

    #[tokio::test]
    async fn test_update_missing_returns_none() {
        let store = InMemoryMetadataStore::new();
        let updated = DatabaseRepository::update(&store, "db_x", DatabasePatch::default())
            .await
            .unwrap();
        assert!(updated.is_none());
    }
}
