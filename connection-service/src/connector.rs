//! Engine connectors.
//!
//! A connector owns the live connections and the in-memory metadata cache
//! of every registered database of one engine type. [`SqlConnector`] is the
//! object-safe surface used by the factory and the manager; [`Connector`]
//! implements it for any [`Driver`].
//!
//! Lock discipline:
//! - each database id has its own connection slot lock (see [`PoolManager`])
//! - one metadata lock guards databases, tables and the selected set; it is
//!   never held across a driver or store call
//! - one save lock serializes writes to the metadata store; the snapshot is
//!   taken after acquiring it

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use common::config::ConnectorSettings;
use common::errors::{AppError, AppResult};
use common::models::{
    ConnectInfo, CreateDatabaseRequest, Database, DatabaseInfo, DatabasePatch, DatabaseUpdate,
    QueryResult, Table,
};
use common::utils::IdGenerator;
use tokio::sync::Mutex;

use crate::driver::{render_table_description, Driver};
use crate::pool_manager::{Lease, PoolManager};
use crate::store::MetadataStore;

/// Future returned by the body of a scoped cursor.
pub type CursorFuture<'c, T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send + 'c>>;

/// Engine-independent connector surface.
#[async_trait]
pub trait SqlConnector: Send + Sync {
    /// Engine type key served by this connector.
    fn engine_type(&self) -> &'static str;

    /// Root of the per-database working directories.
    fn work_dir(&self) -> &Path;

    /// Makes sure a live connection to `db_id` is cached.
    async fn ensure_connection(&self, db_id: &str) -> AppResult<()>;

    /// Whether a live connection to `db_id` is cached.
    async fn is_connected(&self, db_id: &str) -> bool;

    /// Force-closes the cached connection of `db_id`.
    async fn invalidate_connection(&self, db_id: &str);

    /// Closes connections past their maximum age; returns how many.
    async fn evict_stale_connections(&self) -> usize;

    /// Registers a database and persists it.
    async fn create_database(&self, request: CreateDatabaseRequest) -> AppResult<Database>;

    async fn get_database(&self, db_id: &str) -> Option<Database>;

    async fn get_database_info(&self, db_id: &str) -> AppResult<DatabaseInfo>;

    async fn list_databases(&self) -> Vec<DatabaseInfo>;

    /// Introspects the schema of `db_id` and refreshes its tables.
    async fn initialize_tables(&self, db_id: &str) -> AppResult<Vec<Table>>;

    /// Replaces the selected set of `db_id` with `table_ids`.
    async fn select_tables(&self, db_id: &str, table_ids: &[String]) -> AppResult<Vec<Table>>;

    /// Removes one table from the selected set; `None` when it was not selected.
    async fn unselect_table(&self, table_id: &str) -> AppResult<Option<Table>>;

    /// Mutates the cached record; persistence runs in the background.
    async fn update_database(&self, db_id: &str, update: DatabaseUpdate) -> AppResult<Database>;

    /// Removes the database, its tables and its working directory.
    async fn delete_database(&self, db_id: &str) -> AppResult<()>;

    async fn get_tables(&self, db_id: &str) -> Vec<Table>;

    async fn get_table(&self, table_id: &str) -> AppResult<Table>;

    async fn get_selected_tables(&self, db_id: &str) -> Vec<Table>;

    async fn table_exists(&self, db_id: &str, table_id: &str) -> bool;

    /// Runs a read statement under a timeout, keeping at most `limit` rows.
    async fn execute_query(
        &self,
        db_id: &str,
        sql: &str,
        limit: usize,
        timeout: Duration,
    ) -> AppResult<QueryResult>;

    /// Round-trip latency of a trivial statement on the cached connection.
    async fn test_connection(&self, db_id: &str) -> AppResult<Duration>;

    /// Connects with unregistered credentials; returns the latency.
    async fn probe(&self, info: &ConnectInfo) -> AppResult<Duration>;

    /// Replaces the cache with the store's content for this engine.
    async fn load_metadata(&self) -> AppResult<()>;

    /// Writes every cached record to the store.
    async fn save_metadata(&self) -> AppResult<()>;

    /// Closes every live connection.
    async fn close(&self);
}

/// The in-memory metadata of one connector.
#[derive(Default)]
struct MetadataCache {
    databases: HashMap<String, Database>,
    tables: HashMap<String, Table>,
    selected: HashMap<String, Table>,
}

impl MetadataCache {
    fn tables_of(&self, db_id: &str) -> Vec<Table> {
        sorted(self.tables.values().filter(|t| t.database_id == db_id))
    }

    fn selected_of(&self, db_id: &str) -> Vec<Table> {
        sorted(self.selected.values().filter(|t| t.database_id == db_id))
    }

    fn info(&self, database: &Database) -> DatabaseInfo {
        let tables = self.tables_of(&database.db_id);
        DatabaseInfo {
            database: database.clone(),
            table_count: tables.len(),
            tables,
        }
    }
}

/// Newest first, then by name.
fn sorted<'a>(tables: impl Iterator<Item = &'a Table>) -> Vec<Table> {
    let mut tables: Vec<Table> = tables.cloned().collect();
    tables.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.tablename.cmp(&b.tablename))
    });
    tables
}

/// Records deleted from the cache that the next save must delete from the store.
#[derive(Default)]
struct Removals {
    databases: Vec<String>,
    tables: Vec<String>,
}

struct Inner<D: Driver> {
    driver: Arc<D>,
    pools: PoolManager<D>,
    store: MetadataStore,
    work_dir: PathBuf,
    settings: ConnectorSettings,
    meta: Mutex<MetadataCache>,
    save_lock: Mutex<()>,
}

/// Connector for the engine served by `D`.
///
/// Cheap to clone; clones share connections and metadata.
pub struct Connector<D: Driver> {
    inner: Arc<Inner<D>>,
}

impl<D: Driver> Clone for Connector<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Driver> Connector<D> {
    /// Creates a connector with an empty cache.
    ///
    /// # Arguments
    /// * `driver` - Engine driver
    /// * `work_dir` - Directory holding one sub-directory per database
    /// * `store` - Durable metadata store
    /// * `settings` - Connection lifecycle settings
    pub fn new(
        driver: D,
        work_dir: PathBuf,
        store: MetadataStore,
        settings: ConnectorSettings,
    ) -> Self {
        let driver = Arc::new(driver);
        Self {
            inner: Arc::new(Inner {
                pools: PoolManager::new(driver.clone(), settings.clone()),
                driver,
                store,
                work_dir,
                settings,
                meta: Mutex::new(MetadataCache::default()),
                save_lock: Mutex::new(()),
            }),
        }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.inner.driver
    }

    async fn connect_info(&self, db_id: &str) -> AppResult<ConnectInfo> {
        self.inner
            .meta
            .lock()
            .await
            .databases
            .get(db_id)
            .map(|db| db.connect_info.clone())
            .ok_or_else(|| AppError::DatabaseNotFound(db_id.to_string()))
    }

    /// Returns the cached live connection of `db_id`, creating it if needed.
    pub async fn get_connection(&self, db_id: &str) -> AppResult<D::Conn> {
        self.lease(db_id).await.map(|lease| lease.conn)
    }

    async fn lease(&self, db_id: &str) -> AppResult<Lease<D::Conn>> {
        let info = self.connect_info(db_id).await?;
        self.inner.pools.get_connection(db_id, &info).await
    }

    /// Opens a cursor, retrying once on a fresh connection when the cached
    /// one turns out to be dead. Also returns the generation of the
    /// connection the cursor runs on.
    async fn open_cursor(&self, db_id: &str) -> AppResult<(D::Cursor, u64)> {
        let lease = self.lease(db_id).await?;
        match self.inner.driver.open_cursor(&lease.conn).await {
            Ok(cursor) => return Ok((cursor, lease.generation)),
            Err(e) if self.inner.driver.is_connection_error(&e) => {
                tracing::warn!(db_id = %db_id, error = %e, "Cursor acquisition failed, reconnecting");
                self.inner.pools.invalidate_if(db_id, lease.generation).await;
            }
            Err(e) => return Err(AppError::Query(e)),
        }

        let lease = self.lease(db_id).await?;
        match self.inner.driver.open_cursor(&lease.conn).await {
            Ok(cursor) => Ok((cursor, lease.generation)),
            Err(e) => {
                if self.inner.driver.is_connection_error(&e) {
                    self.inner.pools.invalidate_if(db_id, lease.generation).await;
                }
                Err(AppError::Query(e))
            }
        }
    }

    async fn rollback_quietly(&self, db_id: &str, generation: u64, cursor: D::Cursor) {
        if let Err(e) = self.inner.driver.rollback(cursor).await {
            tracing::warn!(db_id = %db_id, error = %e, "Rollback failed");
            if self.inner.driver.is_connection_error(&e) {
                self.inner.pools.invalidate_if(db_id, generation).await;
            }
        }
    }

    /// Commits on success, rolls back on failure and invalidates the
    /// connection of `generation` when the failure is connection-level.
    async fn finish<T>(
        &self,
        db_id: &str,
        generation: u64,
        cursor: D::Cursor,
        outcome: AppResult<T>,
    ) -> AppResult<T> {
        match outcome {
            Ok(value) => match self.inner.driver.commit(cursor).await {
                Ok(()) => Ok(value),
                Err(e) => {
                    if self.inner.driver.is_connection_error(&e) {
                        self.inner.pools.invalidate_if(db_id, generation).await;
                    }
                    Err(AppError::Query(e))
                }
            },
            Err(err) => {
                self.rollback_quietly(db_id, generation, cursor).await;
                if let AppError::Query(e) = &err {
                    if self.inner.driver.is_connection_error(e) {
                        tracing::warn!(db_id = %db_id, error = %e, "Connection-level failure, invalidating");
                        self.inner.pools.invalidate_if(db_id, generation).await;
                    }
                }
                Err(err)
            }
        }
    }

    /// Runs `body` on a cursor of `db_id` as one commit-or-rollback unit.
    ///
    /// The cursor is released exactly once on every exit path; if the
    /// returned future is dropped mid-body the driver rolls back on drop.
    /// Connection acquisition errors are returned before `body` runs.
    pub async fn scoped_cursor<T, F>(&self, db_id: &str, body: F) -> AppResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut D::Cursor) -> CursorFuture<'c, T> + Send,
    {
        let (mut cursor, generation) = self.open_cursor(db_id).await?;
        let outcome = body(&mut cursor).await;
        self.finish(db_id, generation, cursor, outcome).await
    }

    /// Like [`Connector::scoped_cursor`], bounding the body by `timeout`.
    ///
    /// On expiry `QueryTimeout` is returned at once and the rollback runs in
    /// a background task, since the engine may first have to drain the
    /// cancelled statement. The connection stays cached.
    pub async fn scoped_cursor_with_timeout<T, F>(
        &self,
        db_id: &str,
        timeout: Duration,
        body: F,
    ) -> AppResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut D::Cursor) -> CursorFuture<'c, T> + Send,
    {
        let (mut cursor, generation) = self.open_cursor(db_id).await?;
        let outcome = tokio::time::timeout(timeout, body(&mut cursor)).await;
        match outcome {
            Ok(outcome) => self.finish(db_id, generation, cursor, outcome).await,
            Err(_) => {
                tracing::warn!(db_id = %db_id, timeout_ms = timeout.as_millis() as u64, "Query timed out");
                let connector = self.clone();
                let db_id = db_id.to_string();
                tokio::spawn(async move {
                    connector.rollback_quietly(&db_id, generation, cursor).await;
                });
                Err(AppError::QueryTimeout(timeout.as_millis()))
            }
        }
    }

    /// Applies `removals` and writes the cache snapshot, under the save lock.
    async fn persist(&self, removals: Removals) -> AppResult<()> {
        let _guard = self.inner.save_lock.lock().await;
        let store = &self.inner.store;

        for db_id in &removals.databases {
            store.tables.delete_by_database(db_id).await?;
            store.databases.delete(db_id).await?;
        }
        for table_id in &removals.tables {
            store.tables.delete(table_id).await?;
        }

        let (databases, tables) = {
            let meta = self.inner.meta.lock().await;
            (
                meta.databases.values().cloned().collect::<Vec<_>>(),
                meta.tables.values().cloned().collect::<Vec<_>>(),
            )
        };

        for database in &databases {
            match store.databases.get_by_id(&database.db_id).await? {
                Some(_) => {
                    store
                        .databases
                        .update(&database.db_id, DatabasePatch::full(database))
                        .await?;
                }
                None => {
                    store.databases.create(database).await?;
                }
            }
        }
        for table in &tables {
            store.tables.upsert(table).await?;
        }

        tracing::debug!(
            engine = self.inner.driver.engine_type(),
            database_count = databases.len(),
            table_count = tables.len(),
            "Metadata saved"
        );
        Ok(())
    }

    fn database_dir(&self, db_id: &str) -> PathBuf {
        self.inner.work_dir.join(db_id)
    }
}

#[async_trait]
impl<D: Driver> SqlConnector for Connector<D> {
    fn engine_type(&self) -> &'static str {
        self.inner.driver.engine_type()
    }

    fn work_dir(&self) -> &Path {
        &self.inner.work_dir
    }

    async fn ensure_connection(&self, db_id: &str) -> AppResult<()> {
        self.get_connection(db_id).await.map(|_| ())
    }

    async fn is_connected(&self, db_id: &str) -> bool {
        self.inner.pools.is_connected(db_id).await
    }

    async fn invalidate_connection(&self, db_id: &str) {
        self.inner.pools.invalidate(db_id).await;
    }

    async fn evict_stale_connections(&self) -> usize {
        self.inner.pools.evict_stale().await
    }

    async fn create_database(&self, request: CreateDatabaseRequest) -> AppResult<Database> {
        let now = Utc::now();
        let database = {
            let mut meta = self.inner.meta.lock().await;
            let db_id = loop {
                let candidate = IdGenerator::database_id(&request.name);
                if !meta.databases.contains_key(&candidate) {
                    break candidate;
                }
            };
            let database = Database {
                db_id,
                name: request.name,
                description: request.description,
                engine_type: self.inner.driver.engine_type().to_string(),
                connect_info: request.connect_info,
                share_config: request.share_config.unwrap_or_default(),
                related_db_ids: request.related_db_ids,
                created_at: now,
                updated_at: now,
            };
            meta.databases
                .insert(database.db_id.clone(), database.clone());
            database
        };

        let saved = match tokio::fs::create_dir_all(self.database_dir(&database.db_id)).await {
            Ok(()) => self.save_metadata().await,
            Err(e) => Err(AppError::from(e)),
        };
        if let Err(e) = saved {
            self.inner.meta.lock().await.databases.remove(&database.db_id);
            return Err(e);
        }

        tracing::info!(db_id = %database.db_id, name = %database.name, "Database registered");
        Ok(database)
    }

    async fn get_database(&self, db_id: &str) -> Option<Database> {
        self.inner.meta.lock().await.databases.get(db_id).cloned()
    }

    async fn get_database_info(&self, db_id: &str) -> AppResult<DatabaseInfo> {
        let meta = self.inner.meta.lock().await;
        meta.databases
            .get(db_id)
            .map(|database| meta.info(database))
            .ok_or_else(|| AppError::DatabaseNotFound(db_id.to_string()))
    }

    async fn list_databases(&self) -> Vec<DatabaseInfo> {
        let meta = self.inner.meta.lock().await;
        let mut databases: Vec<&Database> = meta.databases.values().collect();
        databases.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        databases.into_iter().map(|db| meta.info(db)).collect()
    }

    async fn initialize_tables(&self, db_id: &str) -> AppResult<Vec<Table>> {
        let schema = self.connect_info(db_id).await?.database;

        let driver = self.inner.driver.clone();
        let introspected_schema = schema.clone();
        let schemas = self
            .scoped_cursor(db_id, move |cursor| {
                Box::pin(async move {
                    driver
                        .introspect(cursor, &introspected_schema)
                        .await
                        .map_err(AppError::from)
                })
            })
            .await?;

        let now = Utc::now();
        let (tables, dropped) = {
            let mut guard = self.inner.meta.lock().await;
            let meta = &mut *guard;
            if !meta.databases.contains_key(db_id) {
                return Err(AppError::DatabaseNotFound(db_id.to_string()));
            }

            let existing: HashMap<String, Table> = meta
                .tables
                .values()
                .filter(|t| t.database_id == db_id)
                .map(|t| (t.tablename.clone(), t.clone()))
                .collect();

            let mut seen = HashSet::new();
            for table_schema in &schemas {
                let tablename = format!("{}.{}", schema, table_schema.name);
                let total_description = render_table_description(&tablename, table_schema);
                let table = match existing.get(&tablename) {
                    Some(previous) => Table {
                        description: table_schema.comment.clone(),
                        total_description,
                        updated_at: now,
                        ..previous.clone()
                    },
                    None => {
                        let table_id = loop {
                            let candidate = IdGenerator::table_id(&tablename);
                            if !meta.tables.contains_key(&candidate) {
                                break candidate;
                            }
                        };
                        Table {
                            table_id,
                            database_id: db_id.to_string(),
                            tablename,
                            description: table_schema.comment.clone(),
                            total_description,
                            is_choose: false,
                            created_at: now,
                            updated_at: now,
                        }
                    }
                };
                seen.insert(table.table_id.clone());
                if table.is_choose {
                    meta.selected.insert(table.table_id.clone(), table.clone());
                }
                meta.tables.insert(table.table_id.clone(), table);
            }

            let dropped: Vec<String> = existing
                .into_values()
                .map(|t| t.table_id)
                .filter(|id| !seen.contains(id))
                .collect();
            for table_id in &dropped {
                meta.tables.remove(table_id);
                meta.selected.remove(table_id);
            }

            (meta.tables_of(db_id), dropped)
        };

        self.persist(Removals {
            tables: dropped.clone(),
            ..Removals::default()
        })
        .await?;

        tracing::info!(
            db_id = %db_id,
            table_count = tables.len(),
            dropped = dropped.len(),
            "Tables initialized"
        );
        Ok(tables)
    }

    async fn select_tables(&self, db_id: &str, table_ids: &[String]) -> AppResult<Vec<Table>> {
        let now = Utc::now();
        let selected = {
            let mut guard = self.inner.meta.lock().await;
            let meta = &mut *guard;
            if !meta.databases.contains_key(db_id) {
                return Err(AppError::DatabaseNotFound(db_id.to_string()));
            }
            for table_id in table_ids {
                match meta.tables.get(table_id) {
                    Some(table) if table.database_id == db_id => {}
                    _ => return Err(AppError::TableNotFound(table_id.clone())),
                }
            }

            let previous: Vec<String> = meta
                .selected
                .values()
                .filter(|t| t.database_id == db_id)
                .map(|t| t.table_id.clone())
                .collect();
            for table_id in &previous {
                meta.selected.remove(table_id);
                if let Some(table) = meta.tables.get_mut(table_id) {
                    table.is_choose = false;
                    table.updated_at = now;
                }
            }

            for table_id in table_ids {
                if let Some(table) = meta.tables.get_mut(table_id) {
                    table.is_choose = true;
                    table.updated_at = now;
                    meta.selected.insert(table_id.clone(), table.clone());
                }
            }

            meta.selected_of(db_id)
        };

        self.save_metadata().await?;
        tracing::info!(db_id = %db_id, selected = selected.len(), "Table selection replaced");
        Ok(selected)
    }

    async fn unselect_table(&self, table_id: &str) -> AppResult<Option<Table>> {
        let removed = {
            let mut guard = self.inner.meta.lock().await;
            let meta = &mut *guard;
            if meta.selected.remove(table_id).is_none() {
                return Ok(None);
            }
            meta.tables.get_mut(table_id).map(|table| {
                table.is_choose = false;
                table.updated_at = Utc::now();
                table.clone()
            })
        };

        self.save_metadata().await?;
        Ok(removed)
    }

    async fn update_database(&self, db_id: &str, update: DatabaseUpdate) -> AppResult<Database> {
        let updated = {
            let mut meta = self.inner.meta.lock().await;
            let database = meta
                .databases
                .get_mut(db_id)
                .ok_or_else(|| AppError::DatabaseNotFound(db_id.to_string()))?;
            database.name = update.name;
            database.description = update.description;
            if let Some(share_config) = update.share_config {
                database.share_config = share_config;
            }
            if let Some(related_db_ids) = update.related_db_ids {
                database.related_db_ids = related_db_ids;
            }
            database.updated_at = Utc::now();
            database.clone()
        };

        let connector = self.clone();
        let id = db_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = connector.save_metadata().await {
                tracing::error!(db_id = %id, error = %e, "Background metadata save failed");
            }
        });

        Ok(updated)
    }

    async fn delete_database(&self, db_id: &str) -> AppResult<()> {
        let removals = {
            let mut guard = self.inner.meta.lock().await;
            let meta = &mut *guard;
            if meta.databases.remove(db_id).is_none() {
                return Ok(());
            }

            let owned: Vec<String> = meta
                .tables
                .values()
                .filter(|t| t.database_id == db_id)
                .map(|t| t.table_id.clone())
                .collect();
            for table_id in &owned {
                meta.tables.remove(table_id);
                meta.selected.remove(table_id);
            }

            let now = Utc::now();
            for other in meta.databases.values_mut() {
                let before = other.related_db_ids.len();
                other.related_db_ids.retain(|id| id != db_id);
                if other.related_db_ids.len() != before {
                    other.updated_at = now;
                }
            }

            Removals {
                databases: vec![db_id.to_string()],
                tables: owned,
            }
        };
        let table_count = removals.tables.len();

        self.inner.pools.remove(db_id).await;
        self.persist(removals).await?;

        let dir = self.database_dir(db_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(db_id = %db_id, path = %dir.display(), error = %e, "Failed to remove working directory");
            }
        }

        tracing::info!(db_id = %db_id, table_count, "Database deleted");
        Ok(())
    }

    async fn get_tables(&self, db_id: &str) -> Vec<Table> {
        self.inner.meta.lock().await.tables_of(db_id)
    }

    async fn get_table(&self, table_id: &str) -> AppResult<Table> {
        self.inner
            .meta
            .lock()
            .await
            .tables
            .get(table_id)
            .cloned()
            .ok_or_else(|| AppError::TableNotFound(table_id.to_string()))
    }

    async fn get_selected_tables(&self, db_id: &str) -> Vec<Table> {
        self.inner.meta.lock().await.selected_of(db_id)
    }

    async fn table_exists(&self, db_id: &str, table_id: &str) -> bool {
        self.inner
            .meta
            .lock()
            .await
            .tables
            .get(table_id)
            .is_some_and(|t| t.database_id == db_id)
    }

    async fn execute_query(
        &self,
        db_id: &str,
        sql: &str,
        limit: usize,
        timeout: Duration,
    ) -> AppResult<QueryResult> {
        let driver = self.inner.driver.clone();
        let sql = sql.to_string();
        self.scoped_cursor_with_timeout(db_id, timeout, move |cursor| {
            Box::pin(async move { driver.fetch(cursor, &sql, limit).await.map_err(AppError::from) })
        })
        .await
    }

    async fn test_connection(&self, db_id: &str) -> AppResult<Duration> {
        let start = Instant::now();
        self.execute_query(db_id, "SELECT 1", 1, self.inner.settings.connect_timeout)
            .await?;
        Ok(start.elapsed())
    }

    async fn probe(&self, info: &ConnectInfo) -> AppResult<Duration> {
        let missing = info.missing_fields();
        if !missing.is_empty() {
            return Err(AppError::Configuration(format!(
                "connect_info is missing: {}",
                missing.join(", ")
            )));
        }

        let start = Instant::now();
        self.inner
            .driver
            .probe(info, self.inner.settings.connect_timeout)
            .await
            .map_err(|e| AppError::ConnectionFailed {
                db_id: format!("{}@{}:{}", info.database, info.host, info.port),
                attempts: 1,
                source: e,
            })?;
        Ok(start.elapsed())
    }

    async fn load_metadata(&self) -> AppResult<()> {
        let _guard = self.inner.save_lock.lock().await;
        let store = &self.inner.store;
        let engine = self.inner.driver.engine_type();

        let databases: HashMap<String, Database> = store
            .databases
            .get_all()
            .await?
            .into_iter()
            .filter(|db| db.engine_type.eq_ignore_ascii_case(engine))
            .map(|db| (db.db_id.clone(), db))
            .collect();

        let mut tables = HashMap::new();
        for db_id in databases.keys() {
            for table in store.tables.list_by_database(db_id).await? {
                tables.insert(table.table_id.clone(), table);
            }
        }
        let selected = tables
            .values()
            .filter(|t: &&Table| t.is_choose)
            .map(|t| (t.table_id.clone(), t.clone()))
            .collect();

        let (database_count, table_count) = (databases.len(), tables.len());
        *self.inner.meta.lock().await = MetadataCache {
            databases,
            tables,
            selected,
        };

        tracing::info!(engine, database_count, table_count, "Metadata loaded");
        Ok(())
    }

    async fn save_metadata(&self) -> AppResult<()> {
        self.persist(Removals::default()).await
    }

    async fn close(&self) {
        self.inner.pools.close_all().await;
        tracing::info!(engine = self.inner.driver.engine_type(), "Connector closed");
    }
}
