//! Shared fixtures: an in-process scripted driver and store wrappers.
//!
//! Statements understood by [`FakeDriver::fetch`]:
//! - `FAIL CONNECTION`: fails with a transport error
//! - `FAIL STATEMENT`: fails with a statement-level error
//! - `SLEEP <ms>`: sleeps, then returns one row
//! - `INSERT ...`: staged on the cursor, recorded on commit
//! - `ROWS <n>`: returns `n` rows
//! - anything else: one row

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::config::ConnectorSettings;
use common::errors::{AppError, AppResult};
use common::models::{
    ColumnInfo, ConnectInfo, CreateDatabaseRequest, QueryResult, Role, ShareConfig, Table,
    TablePatch, User,
};
use connection_service::driver::{ColumnSchema, Driver, IndexSchema, TableSchema};
use connection_service::store::InMemoryMetadataStore;
use connection_service::{Connector, ConnectorFactory, DatabaseManager, MetadataStore, TableRepository};
use tempfile::TempDir;

pub const ENGINE: &str = "fake";

/// Counters and scripted behavior shared by every clone of the driver.
#[derive(Default)]
pub struct FakeState {
    pub connects: AtomicU32,
    pub closes: AtomicU32,
    /// Upcoming connect attempts that fail.
    pub fail_connects: AtomicU32,
    /// Upcoming cursor openings that fail with a transport error.
    pub fail_open_cursors: AtomicU32,
    pub open_cursors: AtomicU32,
    pub commits: AtomicU32,
    pub rollbacks: AtomicU32,
    /// Delay before a rollback completes, as when the server drains a
    /// cancelled statement first.
    pub rollback_delay_ms: AtomicU64,
    /// Delay before a close completes, as when a pool waits for its
    /// checked-out connections.
    pub close_delay_ms: AtomicU64,
    pub committed: Mutex<Vec<String>>,
    pub schema: Mutex<Vec<TableSchema>>,
}

impl FakeState {
    pub fn with_schema(tables: &[&str]) -> Arc<Self> {
        let state = Self::default();
        state.set_schema(tables);
        Arc::new(state)
    }

    pub fn set_schema(&self, tables: &[&str]) {
        *self.schema.lock().unwrap() = tables.iter().map(|name| table_schema(name)).collect();
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> Vec<String> {
        self.committed.lock().unwrap().clone()
    }
}

pub fn table_schema(name: &str) -> TableSchema {
    TableSchema {
        name: name.to_string(),
        comment: format!("{name} table"),
        columns: vec![ColumnSchema {
            name: "id".into(),
            column_type: "bigint".into(),
            nullable: false,
            key: "PRI".into(),
            default: None,
            extra: "auto_increment".into(),
            comment: String::new(),
        }],
        indexes: vec![IndexSchema {
            name: "PRIMARY".into(),
            unique: true,
            columns: vec!["id".into()],
        }],
    }
}

#[derive(Clone)]
pub struct FakeConn {
    pub id: u32,
    closed: Arc<AtomicBool>,
}

pub struct FakeCursor {
    staged: Vec<String>,
}

pub struct FakeDriver {
    pub state: Arc<FakeState>,
}

fn transport_error(kind: std::io::ErrorKind) -> sqlx::Error {
    sqlx::Error::Io(std::io::Error::new(kind, "simulated transport failure"))
}

#[async_trait]
impl Driver for FakeDriver {
    type Conn = FakeConn;
    type Cursor = FakeCursor;

    fn engine_type(&self) -> &'static str {
        ENGINE
    }

    fn description(&self) -> &'static str {
        "Scripted in-process engine"
    }

    async fn connect(&self, _info: &ConnectInfo) -> Result<FakeConn, sqlx::Error> {
        let pending = self.state.fail_connects.load(Ordering::SeqCst);
        if pending > 0 {
            self.state.fail_connects.store(pending - 1, Ordering::SeqCst);
            return Err(transport_error(std::io::ErrorKind::ConnectionRefused));
        }
        let id = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeConn {
            id,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn close(&self, conn: &FakeConn) {
        let delay = self.state.close_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if !conn.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self, conn: &FakeConn) -> bool {
        conn.closed.load(Ordering::SeqCst)
    }

    async fn open_cursor(&self, conn: &FakeConn) -> Result<FakeCursor, sqlx::Error> {
        if conn.closed.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolClosed);
        }
        let pending = self.state.fail_open_cursors.load(Ordering::SeqCst);
        if pending > 0 {
            self.state.fail_open_cursors.store(pending - 1, Ordering::SeqCst);
            return Err(transport_error(std::io::ErrorKind::BrokenPipe));
        }
        self.state.open_cursors.fetch_add(1, Ordering::SeqCst);
        Ok(FakeCursor { staged: Vec::new() })
    }

    async fn commit(&self, cursor: FakeCursor) -> Result<(), sqlx::Error> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        self.state.committed.lock().unwrap().extend(cursor.staged);
        Ok(())
    }

    async fn rollback(&self, _cursor: FakeCursor) -> Result<(), sqlx::Error> {
        let delay = self.state.rollback_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(
        &self,
        cursor: &mut FakeCursor,
        sql: &str,
        limit: usize,
    ) -> Result<QueryResult, sqlx::Error> {
        let columns = vec![ColumnInfo {
            name: "value".into(),
            data_type: "BIGINT".into(),
        }];
        let one_row = || vec![vec![serde_json::json!(1)]];

        if sql == "FAIL CONNECTION" {
            return Err(transport_error(std::io::ErrorKind::ConnectionReset));
        }
        if sql == "FAIL STATEMENT" {
            return Err(sqlx::Error::ColumnNotFound("missing_column".into()));
        }
        if let Some(ms) = sql.strip_prefix("SLEEP ") {
            let ms: u64 = ms.trim().parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            return Ok(QueryResult::from_rows(columns, one_row(), limit));
        }
        if sql.starts_with("INSERT") {
            cursor.staged.push(sql.to_string());
            return Ok(QueryResult::from_rows(columns, Vec::new(), limit));
        }
        if let Some(n) = sql.strip_prefix("ROWS ") {
            let n: i64 = n.trim().parse().unwrap_or(0);
            let rows = (0..n)
                .take(limit + 1)
                .map(|i| vec![serde_json::json!(i)])
                .collect();
            return Ok(QueryResult::from_rows(columns, rows, limit));
        }
        Ok(QueryResult::from_rows(columns, one_row(), limit))
    }

    async fn introspect(
        &self,
        _cursor: &mut FakeCursor,
        _schema: &str,
    ) -> Result<Vec<TableSchema>, sqlx::Error> {
        Ok(self.state.schema.lock().unwrap().clone())
    }

    async fn probe(&self, info: &ConnectInfo, _timeout: Duration) -> Result<(), sqlx::Error> {
        if info.host == "unreachable" {
            return Err(transport_error(std::io::ErrorKind::ConnectionRefused));
        }
        Ok(())
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Fast retries and a one-hour connection age.
pub fn settings() -> ConnectorSettings {
    ConnectorSettings {
        connect_timeout: Duration::from_secs(1),
        max_connections: 2,
        max_connection_age: Duration::from_secs(3600),
        connect_retries: 3,
        retry_base_delay: Duration::from_millis(1),
        default_query_timeout: Duration::from_secs(60),
    }
}

pub fn connect_info() -> ConnectInfo {
    ConnectInfo {
        host: "localhost".into(),
        username: "reader".into(),
        password: "secret".into(),
        database: "shop".into(),
        ..ConnectInfo::default()
    }
}

pub fn create_request(name: &str) -> CreateDatabaseRequest {
    CreateDatabaseRequest {
        name: name.to_string(),
        description: format!("{name} database"),
        engine_type: ENGINE.to_string(),
        connect_info: connect_info(),
        share_config: None,
        related_db_ids: Vec::new(),
    }
}

pub fn user(role: Role, department: Option<serde_json::Value>) -> User {
    User {
        user_id: "u-1".into(),
        role,
        department_id: department,
    }
}

pub fn restricted(departments: Vec<serde_json::Value>) -> ShareConfig {
    ShareConfig {
        is_shared: false,
        accessible_departments: departments,
    }
}

pub fn ids(tables: &[Table]) -> Vec<String> {
    let mut ids: Vec<String> = tables.iter().map(|t| t.table_id.clone()).collect();
    ids.sort();
    ids
}

pub fn id_of(tables: &[Table], tablename: &str) -> String {
    tables
        .iter()
        .find(|t| t.tablename == tablename)
        .map(|t| t.table_id.clone())
        .unwrap_or_else(|| panic!("table {tablename} not found"))
}

/// A connector over the fake driver with its own working directory.
pub struct ConnectorHarness {
    pub connector: Connector<FakeDriver>,
    pub state: Arc<FakeState>,
    pub store: MetadataStore,
    pub work_dir: PathBuf,
    _dir: TempDir,
}

impl ConnectorHarness {
    pub fn new(state: Arc<FakeState>) -> Self {
        Self::with_store(state, MetadataStore::in_memory(), settings())
    }

    pub fn with_store(state: Arc<FakeState>, store: MetadataStore, settings: ConnectorSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().join(ENGINE);
        let connector = Connector::new(
            FakeDriver {
                state: state.clone(),
            },
            work_dir.clone(),
            store.clone(),
            settings,
        );
        Self {
            connector,
            state,
            store,
            work_dir,
            _dir: dir,
        }
    }
}

/// A manager serving only the fake engine.
pub struct ManagerHarness {
    pub manager: DatabaseManager,
    pub state: Arc<FakeState>,
    pub store: MetadataStore,
    pub work_dir: PathBuf,
    _dir: TempDir,
}

impl ManagerHarness {
    pub fn new(state: Arc<FakeState>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().to_path_buf();
        Self::build(state, MetadataStore::in_memory(), work_dir, dir)
    }

    /// A second manager over the same store and directory, as after a restart.
    pub fn restart(&self) -> DatabaseManager {
        DatabaseManager::new(
            fake_factory(self.state.clone()),
            self.store.clone(),
            self.work_dir.clone(),
            settings(),
        )
    }

    fn build(state: Arc<FakeState>, store: MetadataStore, work_dir: PathBuf, dir: TempDir) -> Self {
        let manager = DatabaseManager::new(
            fake_factory(state.clone()),
            store.clone(),
            work_dir.clone(),
            settings(),
        );
        Self {
            manager,
            state,
            store,
            work_dir,
            _dir: dir,
        }
    }
}

pub fn fake_factory(state: Arc<FakeState>) -> ConnectorFactory {
    let mut factory = ConnectorFactory::empty();
    factory.register_driver(move |_settings| FakeDriver {
        state: state.clone(),
    });
    factory
}

/// Table repository whose writes can be switched to fail.
pub struct FlakyTables {
    inner: Arc<InMemoryMetadataStore>,
    pub failing: AtomicBool,
}

impl FlakyTables {
    fn check(&self) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(AppError::store("simulated store outage"))
        } else {
            Ok(())
        }
    }
}

/// An in-memory store whose table writes fail while `failing` is set.
pub fn flaky_store() -> (MetadataStore, Arc<FlakyTables>) {
    let inner = Arc::new(InMemoryMetadataStore::new());
    let tables = Arc::new(FlakyTables {
        inner: inner.clone(),
        failing: AtomicBool::new(false),
    });
    (MetadataStore::new(inner, tables.clone()), tables)
}

#[async_trait]
impl TableRepository for FlakyTables {
    async fn get_all(&self) -> AppResult<Vec<Table>> {
        TableRepository::get_all(self.inner.as_ref()).await
    }

    async fn list_by_database(&self, db_id: &str) -> AppResult<Vec<Table>> {
        self.inner.list_by_database(db_id).await
    }

    async fn get_by_id(&self, table_id: &str) -> AppResult<Option<Table>> {
        TableRepository::get_by_id(self.inner.as_ref(), table_id).await
    }

    async fn create(&self, table: &Table) -> AppResult<Table> {
        self.check()?;
        TableRepository::create(self.inner.as_ref(), table).await
    }

    async fn update(&self, table_id: &str, patch: TablePatch) -> AppResult<Option<Table>> {
        self.check()?;
        TableRepository::update(self.inner.as_ref(), table_id, patch).await
    }

    async fn upsert(&self, table: &Table) -> AppResult<Table> {
        self.check()?;
        self.inner.upsert(table).await
    }

    async fn delete(&self, table_id: &str) -> AppResult<()> {
        self.check()?;
        TableRepository::delete(self.inner.as_ref(), table_id).await
    }

    async fn delete_by_database(&self, db_id: &str) -> AppResult<()> {
        self.check()?;
        self.inner.delete_by_database(db_id).await
    }
}
