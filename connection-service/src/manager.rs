//! Database manager.
//!
//! The single entry point for the rest of the application: resolves a
//! database id to the connector of its engine, enforces sharing rules and
//! serializes registrations so database names stay unique.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::config::{AppConfig, ConnectorSettings, DefaultDatabaseConfig};
use common::errors::{AppError, AppResult};
use common::models::{
    ConnectInfo, CreateDatabaseRequest, Database, DatabaseInfo, DatabasePatch, DatabaseUpdate,
    QueryRequest, QueryResult, Table, User,
};
use tokio::sync::{Mutex, RwLock};
use validator::Validate;

use crate::connector::SqlConnector;
use crate::factory::ConnectorFactory;
use crate::store::MetadataStore;

/// Routes database operations to per-engine connectors.
pub struct DatabaseManager {
    factory: ConnectorFactory,
    store: MetadataStore,
    work_dir: PathBuf,
    settings: ConnectorSettings,
    /// Connectors indexed by lowercase engine type.
    connectors: RwLock<HashMap<String, Arc<dyn SqlConnector>>>,
    /// Serializes connector instantiation.
    init_lock: Mutex<()>,
    /// Serializes the name check with the registration or rename it guards.
    create_lock: Mutex<()>,
}

impl DatabaseManager {
    pub fn new(
        factory: ConnectorFactory,
        store: MetadataStore,
        work_dir: PathBuf,
        settings: ConnectorSettings,
    ) -> Self {
        Self {
            factory,
            store,
            work_dir,
            settings,
            connectors: RwLock::new(HashMap::new()),
            init_lock: Mutex::new(()),
            create_lock: Mutex::new(()),
        }
    }

    /// Builds a manager with the default engines from process configuration.
    pub fn from_config(config: &AppConfig, store: MetadataStore) -> Self {
        Self::new(
            ConnectorFactory::with_defaults(),
            store,
            config.work_dir.clone(),
            config.connector_settings(),
        )
    }

    /// Instantiates and loads a connector for every engine in the store.
    ///
    /// Must complete before the manager serves queries.
    pub async fn initialize(&self) -> AppResult<()> {
        let engines: BTreeSet<String> = self
            .store
            .databases
            .get_all()
            .await?
            .into_iter()
            .map(|db| db.engine_type.to_lowercase())
            .collect();

        for engine in &engines {
            if !self.factory.is_type_supported(engine) {
                tracing::warn!(engine = %engine, "Stored databases use an unsupported engine");
                continue;
            }
            self.connector_for_engine(engine).await?;
        }

        tracing::info!(engines = engines.len(), "Database manager initialized");
        Ok(())
    }

    /// Returns the connector of `engine_type`, creating and loading it on
    /// first use.
    pub async fn connector_for_engine(&self, engine_type: &str) -> AppResult<Arc<dyn SqlConnector>> {
        let key = engine_type.to_lowercase();
        if let Some(connector) = self.connectors.read().await.get(&key) {
            return Ok(connector.clone());
        }

        let _guard = self.init_lock.lock().await;
        if let Some(connector) = self.connectors.read().await.get(&key) {
            return Ok(connector.clone());
        }

        let connector = self
            .factory
            .create(
                &key,
                &self.work_dir.join(&key),
                self.store.clone(),
                self.settings.clone(),
            )
            .await?;
        connector.load_metadata().await?;
        self.connectors.write().await.insert(key, connector.clone());
        Ok(connector)
    }

    /// Resolves `db_id` to the connector of its stored engine type.
    pub async fn resolve(&self, db_id: &str) -> AppResult<Arc<dyn SqlConnector>> {
        let database = self
            .store
            .databases
            .get_by_id(db_id)
            .await?
            .ok_or_else(|| AppError::DatabaseNotFound(db_id.to_string()))?;
        self.connector_for_engine(&database.engine_type).await
    }

    /// Engine types that can be registered.
    pub fn available_engines(&self) -> BTreeMap<String, String> {
        self.factory.available_types()
    }

    /// Whether `user` may access `db_id`.
    ///
    /// Superadmins always pass. An unknown database is not accessible.
    pub async fn check_accessible(&self, user: &User, db_id: &str) -> AppResult<bool> {
        if user.is_superadmin() {
            return Ok(true);
        }
        Ok(self
            .store
            .databases
            .get_by_id(db_id)
            .await?
            .is_some_and(|db| db.share_config.permits(user)))
    }

    /// Whether a database other than `exclude` already uses `name`,
    /// compared case-insensitively.
    pub async fn database_name_exists(&self, name: &str, exclude: Option<&str>) -> AppResult<bool> {
        let wanted = name.trim().to_lowercase();
        Ok(self
            .store
            .databases
            .get_all()
            .await?
            .iter()
            .any(|db| Some(db.db_id.as_str()) != exclude && db.name.trim().to_lowercase() == wanted))
    }

    /// Registers a database.
    ///
    /// Rejects names already in use, then persists the sharing rules with
    /// the created record (shared with everyone when unspecified).
    pub async fn create_database(&self, request: CreateDatabaseRequest) -> AppResult<Database> {
        request.validate()?;

        let _guard = self.create_lock.lock().await;
        if self.database_name_exists(&request.name, None).await? {
            return Err(AppError::DuplicateName(request.name));
        }

        let share_config = request.share_config.clone().unwrap_or_default();
        let connector = self.connector_for_engine(&request.engine_type).await?;
        let mut database = connector.create_database(request).await?;

        let patch = DatabasePatch {
            share_config: Some(share_config.clone()),
            ..DatabasePatch::default()
        };
        if self
            .store
            .databases
            .update(&database.db_id, patch)
            .await?
            .is_none()
        {
            self.store.databases.create(&database).await?;
        }
        database.share_config = share_config;

        tracing::info!(
            db_id = %database.db_id,
            name = %database.name,
            engine = %database.engine_type,
            "Database created"
        );
        Ok(database)
    }

    /// Registers the database described by the `MYSQL_*` environment,
    /// unless one with the same name already exists.
    pub async fn ensure_default_database(&self, defaults: DefaultDatabaseConfig) -> AppResult<Database> {
        let name = defaults.connect_info.database.clone();
        let existing = self
            .store
            .databases
            .get_all()
            .await?
            .into_iter()
            .find(|db| db.name.eq_ignore_ascii_case(&name));
        if let Some(database) = existing {
            tracing::info!(db_id = %database.db_id, name = %name, "Default database already registered");
            return Ok(database);
        }

        self.create_database(CreateDatabaseRequest {
            name,
            description: defaults.description,
            engine_type: "mysql".to_string(),
            connect_info: defaults.connect_info,
            share_config: None,
            related_db_ids: Vec::new(),
        })
        .await
    }

    /// Every registered database with its tables.
    pub async fn get_databases(&self) -> AppResult<Vec<DatabaseInfo>> {
        let mut infos = Vec::new();
        for database in self.store.databases.get_all().await? {
            let connector = match self.connector_for_engine(&database.engine_type).await {
                Ok(connector) => connector,
                Err(e) => {
                    tracing::warn!(db_id = %database.db_id, error = %e, "Skipping database");
                    continue;
                }
            };
            match connector.get_database_info(&database.db_id).await {
                Ok(info) => infos.push(info),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(infos)
    }

    /// The databases `user` may access.
    pub async fn get_databases_by_user(&self, user: &User) -> AppResult<Vec<DatabaseInfo>> {
        let databases = self.get_databases().await?;
        if user.is_superadmin() {
            return Ok(databases);
        }
        Ok(databases
            .into_iter()
            .filter(|info| info.database.share_config.permits(user))
            .collect())
    }

    /// Database record with its tables; introspects on first access when no
    /// table is cached yet.
    pub async fn get_database_info(&self, db_id: &str) -> AppResult<DatabaseInfo> {
        let connector = self.resolve(db_id).await?;
        let info = connector.get_database_info(db_id).await?;
        if !info.tables.is_empty() {
            return Ok(info);
        }

        match connector.initialize_tables(db_id).await {
            Ok(_) => connector.get_database_info(db_id).await,
            Err(e) => {
                tracing::warn!(db_id = %db_id, error = %e, "Lazy table initialization failed");
                Ok(info)
            }
        }
    }

    /// Updates the mutable fields of a database and waits until the store
    /// holds them.
    pub async fn update_database(&self, db_id: &str, update: DatabaseUpdate) -> AppResult<Database> {
        if update.name.trim().is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }

        let _guard = self.create_lock.lock().await;
        if self.database_name_exists(&update.name, Some(db_id)).await? {
            return Err(AppError::DuplicateName(update.name));
        }

        let connector = self.resolve(db_id).await?;
        let patch = DatabasePatch {
            name: Some(update.name.clone()),
            description: Some(update.description.clone()),
            share_config: update.share_config.clone(),
            related_db_ids: update.related_db_ids.clone(),
            ..DatabasePatch::default()
        };
        let database = connector.update_database(db_id, update).await?;
        self.store
            .databases
            .update(db_id, patch)
            .await?
            .ok_or_else(|| AppError::DatabaseNotFound(db_id.to_string()))?;

        tracing::info!(db_id = %db_id, name = %database.name, "Database updated");
        Ok(database)
    }

    /// Deletes a database; an unknown id is a no-op.
    pub async fn delete_database(&self, db_id: &str) -> AppResult<()> {
        match self.resolve(db_id).await {
            Ok(connector) => connector.delete_database(db_id).await,
            Err(AppError::DatabaseNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn initialize_tables(&self, db_id: &str) -> AppResult<Vec<Table>> {
        self.resolve(db_id).await?.initialize_tables(db_id).await
    }

    pub async fn select_tables(&self, db_id: &str, table_ids: &[String]) -> AppResult<Vec<Table>> {
        self.resolve(db_id).await?.select_tables(db_id, table_ids).await
    }

    /// Removes `table_id` from the selected set of `db_id`; no-op when it
    /// is not selected.
    pub async fn unselect_table(&self, db_id: &str, table_id: &str) -> AppResult<Option<Table>> {
        let connector = self.resolve(db_id).await?;
        if !connector.table_exists(db_id, table_id).await {
            return Ok(None);
        }
        connector.unselect_table(table_id).await
    }

    pub async fn get_tables(&self, db_id: &str) -> AppResult<Vec<Table>> {
        Ok(self.resolve(db_id).await?.get_tables(db_id).await)
    }

    pub async fn get_selected_tables(&self, db_id: &str) -> AppResult<Vec<Table>> {
        Ok(self.resolve(db_id).await?.get_selected_tables(db_id).await)
    }

    /// A table of `db_id`, including its structural description.
    pub async fn get_table_info(&self, db_id: &str, table_id: &str) -> AppResult<Table> {
        let table = self.resolve(db_id).await?.get_table(table_id).await?;
        if table.database_id != db_id {
            return Err(AppError::TableNotFound(table_id.to_string()));
        }
        Ok(table)
    }

    pub async fn table_exists_in_db(&self, db_id: &str, table_id: &str) -> AppResult<bool> {
        Ok(self.resolve(db_id).await?.table_exists(db_id, table_id).await)
    }

    /// A query request carrying the configured default timeout.
    pub fn new_query(&self, db_id: &str, sql: &str) -> QueryRequest {
        let mut request = QueryRequest::new(db_id, sql);
        request.timeout_secs = self.settings.default_query_timeout.as_secs();
        request
    }

    /// Runs a read query on behalf of `user`.
    pub async fn execute_query(&self, user: &User, request: QueryRequest) -> AppResult<QueryResult> {
        request.validate()?;
        let connector = self.resolve(&request.db_id).await?;
        if !self.check_accessible(user, &request.db_id).await? {
            return Err(AppError::AccessDenied(request.db_id));
        }

        let result = connector
            .execute_query(
                &request.db_id,
                &request.sql,
                request.limit as usize,
                Duration::from_secs(request.timeout_secs),
            )
            .await?;

        tracing::info!(
            db_id = %request.db_id,
            user_id = %user.user_id,
            rows = result.row_count,
            truncated = result.truncated,
            elapsed_ms = result.execution_time_ms,
            "Query executed"
        );
        Ok(result)
    }

    /// Latency of a trivial statement on the database's cached connection.
    pub async fn test_connection(&self, db_id: &str) -> AppResult<Duration> {
        self.resolve(db_id).await?.test_connection(db_id).await
    }

    /// Checks credentials that are not registered yet.
    pub async fn test_connect_info(&self, engine_type: &str, info: &ConnectInfo) -> AppResult<Duration> {
        self.connector_for_engine(engine_type).await?.probe(info).await
    }

    /// Opens (or reuses) the connection of `db_id`.
    pub async fn ensure_connected(&self, db_id: &str) -> AppResult<()> {
        self.resolve(db_id).await?.ensure_connection(db_id).await
    }

    pub async fn invalidate_connection(&self, db_id: &str) -> AppResult<()> {
        self.resolve(db_id).await?.invalidate_connection(db_id).await;
        Ok(())
    }

    /// Sweeps stale connections of every connector.
    pub async fn evict_stale_connections(&self) -> usize {
        let connectors: Vec<Arc<dyn SqlConnector>> =
            self.connectors.read().await.values().cloned().collect();
        let mut evicted = 0;
        for connector in connectors {
            evicted += connector.evict_stale_connections().await;
        }
        if evicted > 0 {
            tracing::info!(evicted, "Stale connections evicted");
        }
        evicted
    }

    /// Persists the connector cache that holds `db_id`.
    pub async fn save_metadata(&self, db_id: &str) -> AppResult<()> {
        self.resolve(db_id).await?.save_metadata().await
    }

    /// Saves every connector's metadata and closes its connections.
    pub async fn shutdown(&self) {
        let connectors: Vec<Arc<dyn SqlConnector>> =
            self.connectors.write().await.drain().map(|(_, c)| c).collect();
        for connector in connectors {
            if let Err(e) = connector.save_metadata().await {
                tracing::error!(engine = connector.engine_type(), error = %e, "Final metadata save failed");
            }
            connector.close().await;
        }
        tracing::info!("Database manager shut down");
    }
}
