//! MySQL driver.
//!
//! Each registered database gets a small sqlx pool whose sessions are
//! forced read-only. A cursor is a transaction on one pooled connection.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::config::ConnectorSettings;
use common::models::{ColumnInfo, ConnectInfo, QueryResult};
use futures_util::TryStreamExt;
use sqlx::mysql::{
    MySqlColumn, MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlPoolOptions,
    MySqlRow,
};
use sqlx::{Column, Connection, Executor, MySql, MySqlPool, Row, Transaction, TypeInfo, ValueRef};

use super::{is_transport_error, ColumnSchema, Driver, IndexSchema, TableSchema};

/// MySQL server error numbers that mean the session is gone.
const CONNECTION_ERROR_CODES: [u16; 11] = [
    1053, // server shutdown in progress
    1152, // aborted connection
    1153, // packet too large, connection dropped
    1158, // read error from connection pipe
    1159, // read timeout
    1160, // write error
    1161, // write timeout
    1927, // connection killed
    2006, // server has gone away
    2013, // lost connection during query
    4031, // disconnected by the server for inactivity
];

const TABLES_SQL: &str = "SELECT CAST(TABLE_NAME AS CHAR) AS table_name,
        CAST(COALESCE(TABLE_COMMENT, '') AS CHAR) AS table_comment
     FROM information_schema.TABLES
     WHERE TABLE_SCHEMA = ?
     ORDER BY TABLE_NAME";

const COLUMNS_SQL: &str = "SELECT CAST(TABLE_NAME AS CHAR) AS table_name,
        CAST(COLUMN_NAME AS CHAR) AS column_name,
        CAST(COLUMN_TYPE AS CHAR) AS column_type,
        CAST(IS_NULLABLE AS CHAR) AS is_nullable,
        CAST(COLUMN_KEY AS CHAR) AS column_key,
        CAST(COLUMN_DEFAULT AS CHAR) AS column_default,
        CAST(EXTRA AS CHAR) AS extra,
        CAST(COALESCE(COLUMN_COMMENT, '') AS CHAR) AS column_comment
     FROM information_schema.COLUMNS
     WHERE TABLE_SCHEMA = ?
     ORDER BY TABLE_NAME, ORDINAL_POSITION";

const INDEXES_SQL: &str = "SELECT CAST(TABLE_NAME AS CHAR) AS table_name,
        CAST(INDEX_NAME AS CHAR) AS index_name,
        CAST(COLUMN_NAME AS CHAR) AS column_name,
        CAST(NON_UNIQUE AS SIGNED) AS non_unique
     FROM information_schema.STATISTICS
     WHERE TABLE_SCHEMA = ?
     ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX";

#[derive(sqlx::FromRow)]
struct TableRow {
    table_name: String,
    table_comment: String,
}

#[derive(sqlx::FromRow)]
struct ColumnRow {
    table_name: String,
    column_name: String,
    column_type: String,
    is_nullable: String,
    column_key: String,
    column_default: Option<String>,
    extra: String,
    column_comment: String,
}

#[derive(sqlx::FromRow)]
struct IndexRow {
    table_name: String,
    index_name: String,
    column_name: Option<String>,
    non_unique: i64,
}

/// MySQL implementation of [`Driver`].
pub struct MySqlDriver {
    settings: ConnectorSettings,
}

impl MySqlDriver {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self { settings }
    }

    fn connect_options(info: &ConnectInfo) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&info.host)
            .port(info.port)
            .username(&info.username)
            .password(&info.password)
            .database(&info.database)
            .charset(&info.charset)
    }

    fn pool_options(&self) -> MySqlPoolOptions {
        MySqlPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.connect_timeout)
            .max_lifetime(self.settings.max_connection_age)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("SET SESSION TRANSACTION READ ONLY").await?;
                    Ok(())
                })
            })
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    type Conn = MySqlPool;
    type Cursor = Transaction<'static, MySql>;

    fn engine_type(&self) -> &'static str {
        "mysql"
    }

    fn description(&self) -> &'static str {
        "MySQL / MariaDB (read-only sessions)"
    }

    async fn connect(&self, info: &ConnectInfo) -> Result<MySqlPool, sqlx::Error> {
        self.pool_options()
            .connect_with(Self::connect_options(info))
            .await
    }

    async fn close(&self, conn: &MySqlPool) {
        conn.close().await;
    }

    fn is_closed(&self, conn: &MySqlPool) -> bool {
        conn.is_closed()
    }

    async fn open_cursor(&self, conn: &MySqlPool) -> Result<Self::Cursor, sqlx::Error> {
        conn.begin().await
    }

    async fn commit(&self, cursor: Self::Cursor) -> Result<(), sqlx::Error> {
        cursor.commit().await
    }

    async fn rollback(&self, cursor: Self::Cursor) -> Result<(), sqlx::Error> {
        cursor.rollback().await
    }

    async fn fetch(
        &self,
        cursor: &mut Self::Cursor,
        sql: &str,
        limit: usize,
    ) -> Result<QueryResult, sqlx::Error> {
        let start = Instant::now();
        let cap = limit.saturating_add(1);
        let mut columns = None;
        let mut values: Vec<Vec<serde_json::Value>> = Vec::new();
        {
            // Stop reading once one row past the limit shows truncation
            let mut rows = sqlx::query(sql).fetch(&mut **cursor);
            while let Some(row) = rows.try_next().await? {
                if columns.is_none() {
                    columns = Some(column_infos(row.columns()));
                }
                values.push((0..row.len()).map(|i| decode_value(&row, i)).collect());
                if values.len() >= cap {
                    break;
                }
            }
        }

        let columns = match columns {
            Some(columns) => columns,
            None => {
                let described = (&mut **cursor).describe(sql).await?;
                column_infos(described.columns())
            }
        };

        let mut result = QueryResult::from_rows(columns, values, limit);
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn introspect(
        &self,
        cursor: &mut Self::Cursor,
        schema: &str,
    ) -> Result<Vec<TableSchema>, sqlx::Error> {
        let tables = sqlx::query_as::<_, TableRow>(TABLES_SQL)
            .bind(schema)
            .fetch_all(&mut **cursor)
            .await?;
        let column_rows = sqlx::query_as::<_, ColumnRow>(COLUMNS_SQL)
            .bind(schema)
            .fetch_all(&mut **cursor)
            .await?;
        let index_rows = sqlx::query_as::<_, IndexRow>(INDEXES_SQL)
            .bind(schema)
            .fetch_all(&mut **cursor)
            .await?;

        let mut columns: BTreeMap<String, Vec<ColumnSchema>> = BTreeMap::new();
        for row in column_rows {
            columns.entry(row.table_name).or_default().push(ColumnSchema {
                name: row.column_name,
                column_type: row.column_type,
                nullable: row.is_nullable.eq_ignore_ascii_case("YES"),
                key: row.column_key,
                default: row.column_default,
                extra: row.extra,
                comment: row.column_comment,
            });
        }

        let mut indexes: BTreeMap<String, Vec<IndexSchema>> = BTreeMap::new();
        for row in index_rows {
            // Functional index parts have no column name
            let column = row.column_name.unwrap_or_else(|| "<expression>".to_string());
            let table_indexes = indexes.entry(row.table_name).or_default();
            match table_indexes.last_mut() {
                Some(last) if last.name == row.index_name => last.columns.push(column),
                _ => table_indexes.push(IndexSchema {
                    name: row.index_name,
                    unique: row.non_unique == 0,
                    columns: vec![column],
                }),
            }
        }

        Ok(tables
            .into_iter()
            .map(|table| TableSchema {
                columns: columns.remove(&table.table_name).unwrap_or_default(),
                indexes: indexes.remove(&table.table_name).unwrap_or_default(),
                name: table.table_name,
                comment: table.table_comment,
            })
            .collect())
    }

    async fn probe(&self, info: &ConnectInfo, timeout: Duration) -> Result<(), sqlx::Error> {
        let options = Self::connect_options(info);
        let mut conn = tokio::time::timeout(timeout, MySqlConnection::connect_with(&options))
            .await
            .map_err(|_| {
                sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out while connecting",
                ))
            })??;
        sqlx::query("SELECT 1").execute(&mut conn).await?;
        conn.close().await
    }

    fn is_connection_error(&self, err: &sqlx::Error) -> bool {
        if is_transport_error(err) {
            return true;
        }
        match err {
            sqlx::Error::Database(db) => db
                .try_downcast_ref::<MySqlDatabaseError>()
                .is_some_and(|e| CONNECTION_ERROR_CODES.contains(&e.number())),
            _ => false,
        }
    }
}

fn column_infos(columns: &[MySqlColumn]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|c| ColumnInfo {
            name: c.name().to_string(),
            data_type: c.type_info().name().to_string(),
        })
        .collect()
}

/// Decodes one cell into JSON, falling back to its textual form.
fn decode_value(row: &MySqlRow, index: usize) -> serde_json::Value {
    use serde_json::Value;

    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    let decoded = match type_name.as_str() {
        "BOOLEAN" => row.try_get::<bool, _>(index).ok().map(Value::from),
        name if name.ends_with("INT UNSIGNED") => row.try_get::<u64, _>(index).ok().map(Value::from),
        name if name.ends_with("INT") => row.try_get::<i64, _>(index).ok().map(Value::from),
        "FLOAT" => row.try_get::<f32, _>(index).ok().map(|v| Value::from(v as f64)),
        "DOUBLE" => row.try_get::<f64, _>(index).ok().map(Value::from),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .ok()
            .map(|v| Value::from(v.to_string())),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .ok()
            .map(|v| Value::from(v.to_string())),
        "JSON" => row.try_get::<serde_json::Value, _>(index).ok(),
        name if name.contains("BINARY") || name.contains("BLOB") => row
            .try_get::<Vec<u8>, _>(index)
            .ok()
            .map(|bytes| Value::from(String::from_utf8_lossy(&bytes).into_owned())),
        _ => row.try_get::<String, _>(index).ok().map(Value::from),
    };

    // DECIMAL, TIME, YEAR, BIT and friends travel as text on the wire
    decoded
        .or_else(|| row.try_get_unchecked::<String, _>(index).ok().map(Value::from))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_identity() {
        let driver = MySqlDriver::new(ConnectorSettings::default());
        assert_eq!(driver.engine_type(), "mysql");
    }

    #[test]
    fn test_mysql_classification_keeps_statement_errors() {
        let driver = MySqlDriver::new(ConnectorSettings::default());
        assert!(driver.is_connection_error(&sqlx::Error::PoolTimedOut));
        assert!(!driver.is_connection_error(&sqlx::Error::RowNotFound));
    }
}
