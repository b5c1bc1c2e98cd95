//! Application state for the connection service.

use std::sync::Arc;

use common::config::AppConfig;
use common::errors::{AppError, AppResult};
use sqlx::mysql::MySqlPoolOptions;

use crate::manager::DatabaseManager;
use crate::store::MetadataStore;

/// State built once at start and shared by reference.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub manager: Arc<DatabaseManager>,
}

impl AppState {
    /// Wires the metadata store and the manager, then loads every connector.
    ///
    /// The metadata store lives in MySQL when `DATABASE_URL` is set and in
    /// process memory otherwise.
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        let store = match &config.metadata_url {
            Some(url) => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
                    .connect(url)
                    .await
                    .map_err(|e| AppError::store(format!("Failed to connect metadata database: {e}")))?;
                tracing::info!("Using MySQL metadata store");
                MetadataStore::mysql(pool).await?
            }
            None => {
                tracing::warn!("DATABASE_URL not set, metadata is kept in memory only");
                MetadataStore::in_memory()
            }
        };

        let manager = Arc::new(DatabaseManager::from_config(&config, store));
        manager.initialize().await?;

        Ok(Self { config, manager })
    }
}
