//! Connector factory.
//!
//! Maps engine type keys to connector constructors. Keys are matched
//! case-insensitively.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::config::ConnectorSettings;
use common::errors::{AppError, AppResult};

use crate::connector::{Connector, SqlConnector};
use crate::driver::{Driver, MySqlDriver};
use crate::store::MetadataStore;

/// Everything a constructor needs to build a connector.
#[derive(Clone)]
pub struct ConnectorContext {
    pub work_dir: PathBuf,
    pub store: MetadataStore,
    pub settings: ConnectorSettings,
}

type Constructor = Arc<dyn Fn(ConnectorContext) -> Arc<dyn SqlConnector> + Send + Sync>;

struct Registration {
    description: String,
    constructor: Constructor,
}

/// Creates connectors by engine type.
pub struct ConnectorFactory {
    registry: HashMap<String, Registration>,
}

impl ConnectorFactory {
    /// A factory with no engine registered.
    pub fn empty() -> Self {
        Self {
            registry: HashMap::new(),
        }
    }

    /// A factory serving the built-in engines (MySQL).
    pub fn with_defaults() -> Self {
        let mut factory = Self::empty();
        factory.register_driver(|settings| MySqlDriver::new(settings));
        factory
    }

    /// Registers a constructor under `engine_type`, replacing any previous one.
    pub fn register<F>(&mut self, engine_type: &str, description: &str, constructor: F)
    where
        F: Fn(ConnectorContext) -> Arc<dyn SqlConnector> + Send + Sync + 'static,
    {
        self.registry.insert(
            engine_type.to_lowercase(),
            Registration {
                description: description.to_string(),
                constructor: Arc::new(constructor),
            },
        );
    }

    /// Registers a [`Connector`] over the driver built by `make_driver`.
    pub fn register_driver<D, F>(&mut self, make_driver: F)
    where
        D: Driver,
        F: Fn(ConnectorSettings) -> D + Send + Sync + 'static,
    {
        let probe = make_driver(ConnectorSettings::default());
        let engine_type = probe.engine_type();
        let description = probe.description();
        self.register(engine_type, description, move |ctx: ConnectorContext| {
            let driver = make_driver(ctx.settings.clone());
            Arc::new(Connector::new(driver, ctx.work_dir, ctx.store, ctx.settings))
                as Arc<dyn SqlConnector>
        });
    }

    pub fn is_type_supported(&self, engine_type: &str) -> bool {
        self.registry.contains_key(&engine_type.to_lowercase())
    }

    /// Engine type keys and their descriptions.
    pub fn available_types(&self) -> BTreeMap<String, String> {
        self.registry
            .iter()
            .map(|(engine, reg)| (engine.clone(), reg.description.clone()))
            .collect()
    }

    /// Creates a connector for `engine_type` working under `work_dir`.
    ///
    /// Creating `work_dir` is the only side effect.
    ///
    /// # Returns
    /// `UnsupportedEngine` listing the available engines when the type is
    /// unknown.
    pub async fn create(
        &self,
        engine_type: &str,
        work_dir: &Path,
        store: MetadataStore,
        settings: ConnectorSettings,
    ) -> AppResult<Arc<dyn SqlConnector>> {
        let registration = self
            .registry
            .get(&engine_type.to_lowercase())
            .ok_or_else(|| AppError::UnsupportedEngine {
                engine: engine_type.to_string(),
                available: self.available_types().into_keys().collect::<Vec<_>>().join(", "),
            })?;

        tokio::fs::create_dir_all(work_dir).await?;

        let connector = (registration.constructor)(ConnectorContext {
            work_dir: work_dir.to_path_buf(),
            store,
            settings,
        });
        tracing::info!(engine = %engine_type, work_dir = %work_dir.display(), "Connector created");
        Ok(connector)
    }
}

impl Default for ConnectorFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}
