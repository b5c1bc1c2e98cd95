//! MySQL-backed metadata store.
//!
//! Persists registered databases in `sql_database` and their tables in
//! `sql_database_table`; both tables are created on start.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::errors::{AppError, AppResult};
use common::models::{ConnectInfo, Database, DatabasePatch, ShareConfig, Table, TablePatch};
use sqlx::types::Json;
use sqlx::MySqlPool;

use super::{DatabaseRepository, TableRepository};

/// Separator of `related_db_ids` in its text column.
const RELATED_IDS_SEPARATOR: &str = ";";

const DATABASE_COLUMNS: &str = "`db_id`, `name`, `description`, `engine_type`, `connect_info`, \
     `share_config`, `related_db_ids`, `created_at`, `updated_at`";

const TABLE_COLUMNS: &str = "`table_id`, `database_id`, `tablename`, `description`, \
     `total_description`, `is_choose`, `created_at`, `updated_at`";

/// Row from the `sql_database` table.
#[derive(sqlx::FromRow)]
struct DatabaseRow {
    db_id: String,
    name: String,
    description: Option<String>,
    engine_type: String,
    connect_info: Json<ConnectInfo>,
    share_config: Option<Json<ShareConfig>>,
    related_db_ids: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DatabaseRow {
    fn into_database(self) -> Database {
        Database {
            db_id: self.db_id,
            name: self.name,
            description: self.description.unwrap_or_default(),
            engine_type: self.engine_type,
            connect_info: self.connect_info.0,
            share_config: self.share_config.map(|c| c.0).unwrap_or_default(),
            related_db_ids: split_related_ids(self.related_db_ids.as_deref()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Row from the `sql_database_table` table.
#[derive(sqlx::FromRow)]
struct TableRow {
    table_id: String,
    database_id: String,
    tablename: String,
    description: Option<String>,
    total_description: Option<String>,
    is_choose: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TableRow {
    fn into_table(self) -> Table {
        Table {
            table_id: self.table_id,
            database_id: self.database_id,
            tablename: self.tablename,
            description: self.description.unwrap_or_default(),
            total_description: self.total_description.unwrap_or_default(),
            is_choose: self.is_choose,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn split_related_ids(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(RELATED_IDS_SEPARATOR)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_related_ids(ids: &[String]) -> String {
    ids.join(RELATED_IDS_SEPARATOR)
}

pub struct MySqlMetadataStore {
    pool: MySqlPool,
}

impl MySqlMetadataStore {
    /// Wraps the pool and makes sure both metadata tables exist.
    pub async fn new(pool: MySqlPool) -> AppResult<Self> {
        let store = Self { pool };
        store.ensure_tables().await?;
        Ok(store)
    }

    async fn ensure_tables(&self) -> AppResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS `sql_database` (
                `db_id`          VARCHAR(64)   NOT NULL,
                `name`           VARCHAR(100)  NOT NULL,
                `description`    TEXT          DEFAULT NULL,
                `engine_type`    VARCHAR(32)   NOT NULL,
                `connect_info`   JSON          NOT NULL,
                `share_config`   JSON          DEFAULT NULL,
                `related_db_ids` TEXT          DEFAULT NULL,
                `created_at`     DATETIME(6)   NOT NULL,
                `updated_at`     DATETIME(6)   NOT NULL,
                PRIMARY KEY (`db_id`),
                KEY `idx_engine_type` (`engine_type`)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store(format!("Failed to create sql_database table: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS `sql_database_table` (
                `table_id`          VARCHAR(64)   NOT NULL,
                `database_id`       VARCHAR(64)   NOT NULL,
                `tablename`         VARCHAR(255)  NOT NULL,
                `description`       TEXT          DEFAULT NULL,
                `total_description` MEDIUMTEXT    DEFAULT NULL,
                `is_choose`         TINYINT(1)    NOT NULL DEFAULT 0,
                `created_at`        DATETIME(6)   NOT NULL,
                `updated_at`        DATETIME(6)   NOT NULL,
                PRIMARY KEY (`table_id`),
                KEY `idx_database_id` (`database_id`),
                CONSTRAINT `fk_table_database` FOREIGN KEY (`database_id`)
                    REFERENCES `sql_database` (`db_id`) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store(format!("Failed to create sql_database_table table: {e}")))?;

        tracing::info!("Metadata tables `sql_database` and `sql_database_table` ensured");
        Ok(())
    }

    async fn write_database(&self, database: &Database) -> AppResult<()> {
        sqlx::query(
            "UPDATE `sql_database` SET `name` = ?, `description` = ?, `engine_type` = ?,
                `connect_info` = ?, `share_config` = ?, `related_db_ids` = ?, `updated_at` = ?
             WHERE `db_id` = ?",
        )
        .bind(&database.name)
        .bind(&database.description)
        .bind(&database.engine_type)
        .bind(Json(&database.connect_info))
        .bind(Json(&database.share_config))
        .bind(join_related_ids(&database.related_db_ids))
        .bind(database.updated_at)
        .bind(&database.db_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store(format!("Failed to update database {}: {e}", database.db_id)))?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseRepository for MySqlMetadataStore {
    async fn get_all(&self) -> AppResult<Vec<Database>> {
        let rows = sqlx::query_as::<_, DatabaseRow>(&format!(
            "SELECT {DATABASE_COLUMNS} FROM `sql_database` ORDER BY `created_at`"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::store(format!("Failed to list databases: {e}")))?;

        Ok(rows.into_iter().map(DatabaseRow::into_database).collect())
    }

    async fn get_by_id(&self, db_id: &str) -> AppResult<Option<Database>> {
        let row = sqlx::query_as::<_, DatabaseRow>(&format!(
            "SELECT {DATABASE_COLUMNS} FROM `sql_database` WHERE `db_id` = ?"
        ))
        .bind(db_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::store(format!("Failed to load database {db_id}: {e}")))?;

        Ok(row.map(DatabaseRow::into_database))
    }

    async fn create(&self, database: &Database) -> AppResult<Database> {
        sqlx::query(&format!(
            "INSERT INTO `sql_database` ({DATABASE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&database.db_id)
        .bind(&database.name)
        .bind(&database.description)
        .bind(&database.engine_type)
        .bind(Json(&database.connect_info))
        .bind(Json(&database.share_config))
        .bind(join_related_ids(&database.related_db_ids))
        .bind(database.created_at)
        .bind(database.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store(format!("Failed to save database {}: {e}", database.db_id)))?;

        Ok(database.clone())
    }

    async fn update(&self, db_id: &str, patch: DatabasePatch) -> AppResult<Option<Database>> {
        let Some(mut database) = DatabaseRepository::get_by_id(self, db_id).await? else {
            return Ok(None);
        };
        patch.apply(&mut database);
        self.write_database(&database).await?;
        Ok(Some(database))
    }

    async fn delete(&self, db_id: &str) -> AppResult<()> {
        // Tables go with the row through ON DELETE CASCADE
        sqlx::query("DELETE FROM `sql_database` WHERE `db_id` = ?")
            .bind(db_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::store(format!("Failed to delete database {db_id}: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl TableRepository for MySqlMetadataStore {
    async fn get_all(&self) -> AppResult<Vec<Table>> {
        let rows = sqlx::query_as::<_, TableRow>(&format!(
            "SELECT {TABLE_COLUMNS} FROM `sql_database_table`"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::store(format!("Failed to list tables: {e}")))?;

        Ok(rows.into_iter().map(TableRow::into_table).collect())
    }

    async fn list_by_database(&self, db_id: &str) -> AppResult<Vec<Table>> {
        let rows = sqlx::query_as::<_, TableRow>(&format!(
            "SELECT {TABLE_COLUMNS} FROM `sql_database_table` WHERE `database_id` = ?"
        ))
        .bind(db_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::store(format!("Failed to list tables of {db_id}: {e}")))?;

        Ok(rows.into_iter().map(TableRow::into_table).collect())
    }

    async fn get_by_id(&self, table_id: &str) -> AppResult<Option<Table>> {
        let row = sqlx::query_as::<_, TableRow>(&format!(
            "SELECT {TABLE_COLUMNS} FROM `sql_database_table` WHERE `table_id` = ?"
        ))
        .bind(table_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::store(format!("Failed to load table {table_id}: {e}")))?;

        Ok(row.map(TableRow::into_table))
    }

    async fn create(&self, table: &Table) -> AppResult<Table> {
        sqlx::query(&format!(
            "INSERT INTO `sql_database_table` ({TABLE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&table.table_id)
        .bind(&table.database_id)
        .bind(&table.tablename)
        .bind(&table.description)
        .bind(&table.total_description)
        .bind(table.is_choose)
        .bind(table.created_at)
        .bind(table.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store(format!("Failed to save table {}: {e}", table.table_id)))?;

        Ok(table.clone())
    }

    async fn update(&self, table_id: &str, patch: TablePatch) -> AppResult<Option<Table>> {
        let Some(mut table) = TableRepository::get_by_id(self, table_id).await? else {
            return Ok(None);
        };
        patch.apply(&mut table);
        self.upsert(&table).await.map(Some)
    }

    async fn upsert(&self, table: &Table) -> AppResult<Table> {
        sqlx::query(&format!(
            "INSERT INTO `sql_database_table` ({TABLE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE
                `database_id` = VALUES(`database_id`),
                `tablename` = VALUES(`tablename`),
                `description` = VALUES(`description`),
                `total_description` = VALUES(`total_description`),
                `is_choose` = VALUES(`is_choose`),
                `updated_at` = VALUES(`updated_at`)"
        ))
        .bind(&table.table_id)
        .bind(&table.database_id)
        .bind(&table.tablename)
        .bind(&table.description)
        .bind(&table.total_description)
        .bind(table.is_choose)
        .bind(table.created_at)
        .bind(table.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store(format!("Failed to upsert table {}: {e}", table.table_id)))?;

        Ok(table.clone())
    }

    async fn delete(&self, table_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM `sql_database_table` WHERE `table_id` = ?")
            .bind(table_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::store(format!("Failed to delete table {table_id}: {e}")))?;
        Ok(())
    }

    async fn delete_by_database(&self, db_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM `sql_database_table` WHERE `database_id` = ?")
            .bind(db_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::store(format!("Failed to delete tables of {db_id}: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_related_ids_round_trip_through_text() {
        let ids = vec!["db_a".to_string(), "db_b".to_string()];
        let joined = join_related_ids(&ids);
        assert_eq!(joined, "db_a;db_b");
        assert_eq!(split_related_ids(Some(&joined)), ids);
    }

    #[test]
    fn test_related_ids_ignore_blanks() {
        assert!(split_related_ids(None).is_empty());
        assert_eq!(split_related_ids(Some(" db_a ;; ")), vec!["db_a".to_string()]);
    }
}
