//! SQL 数据源连接与元数据管理
//!
//! Registers external SQL databases, introspects their schema, keeps the
//! selected tables of each database and runs read-only queries against
//! them:
//! - [`driver`]: engine drivers (MySQL)
//! - [`pool_manager`]: live connections keyed by database id
//! - [`connector`]: per-engine connection lifecycle and metadata cache
//! - [`factory`]: connector construction by engine type
//! - [`store`]: durable metadata persistence
//! - [`manager`]: the façade used by the rest of the application

pub mod connector;
pub mod driver;
pub mod factory;
pub mod manager;
pub mod pool_manager;
pub mod state;
pub mod store;

pub use connector::{Connector, CursorFuture, SqlConnector};
pub use factory::{ConnectorContext, ConnectorFactory};
pub use manager::DatabaseManager;
pub use store::{DatabaseRepository, MetadataStore, TableRepository};
