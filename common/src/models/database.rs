//! Registered database models.
//!
//! A registered database is an external SQL data source: its credentials,
//! its sharing rules and the ids of related peer databases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::table::Table;

/// Engine-specific connection parameters (MySQL reference layout).
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ConnectInfo {
    /// Database host.
    #[validate(length(min = 1, message = "host is required"))]
    pub host: String,
    /// Login user.
    #[validate(length(min = 1, message = "username is required"))]
    #[serde(alias = "user")]
    pub username: String,
    /// Login password.
    #[serde(default)]
    pub password: String,
    /// Schema name the connection is bound to.
    #[validate(length(min = 1, message = "database is required"))]
    pub database: String,
    /// Database port.
    #[serde(default = "ConnectInfo::default_port", deserialize_with = "port::deserialize")]
    pub port: u16,
    /// Connection charset.
    #[serde(default = "ConnectInfo::default_charset")]
    pub charset: String,
}

impl ConnectInfo {
    pub const DEFAULT_PORT: u16 = 3306;
    pub const DEFAULT_CHARSET: &'static str = "utf8mb4";

    fn default_port() -> u16 {
        Self::DEFAULT_PORT
    }

    fn default_charset() -> String {
        Self::DEFAULT_CHARSET.to_string()
    }

    /// Returns the names of required fields that are empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.username.trim().is_empty() {
            missing.push("username");
        }
        if self.database.trim().is_empty() {
            missing.push("database");
        }
        missing
    }
}

impl Default for ConnectInfo {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: String::new(),
            database: String::new(),
            port: Self::DEFAULT_PORT,
            charset: Self::default_charset(),
        }
    }
}

impl std::fmt::Debug for ConnectInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectInfo")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("port", &self.port)
            .field("charset", &self.charset)
            .finish()
    }
}

mod port {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPort {
        Number(u16),
        Text(String),
    }

    /// Accepts the port either as a number or as a numeric string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<u16, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawPort::deserialize(deserializer)? {
            RawPort::Number(port) => Ok(port),
            RawPort::Text(raw) => raw
                .trim()
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("invalid port: {raw}"))),
        }
    }
}

/// Sharing rules of a registered database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShareConfig {
    /// Visible to every user when true.
    #[serde(default = "ShareConfig::default_shared")]
    pub is_shared: bool,
    /// Department ids allowed when not shared. Values are kept as received
    /// and coerced to integers at check time.
    #[serde(default)]
    pub accessible_departments: Vec<serde_json::Value>,
}

impl ShareConfig {
    fn default_shared() -> bool {
        true
    }

    /// Restricts access to the given departments.
    pub fn departments<I>(departments: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        Self {
            is_shared: false,
            accessible_departments: departments.into_iter().map(serde_json::Value::from).collect(),
        }
    }
}

impl Default for ShareConfig {
    /// Shared with everyone, no department restriction.
    fn default() -> Self {
        Self {
            is_shared: true,
            accessible_departments: Vec::new(),
        }
    }
}

/// A registered external SQL data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Database {
    /// Stable opaque id, immutable once created.
    pub db_id: String,
    /// Display name, unique case-insensitively.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Engine type key, e.g. `mysql`.
    pub engine_type: String,
    /// Credentials of the external database.
    pub connect_info: ConnectInfo,
    /// Sharing rules.
    #[serde(default)]
    pub share_config: ShareConfig,
    /// Ordered ids of related peer databases.
    #[serde(default)]
    pub related_db_ids: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Field-wise update applied by the metadata store.
#[derive(Debug, Clone, Default)]
pub struct DatabasePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub engine_type: Option<String>,
    pub connect_info: Option<ConnectInfo>,
    pub share_config: Option<ShareConfig>,
    pub related_db_ids: Option<Vec<String>>,
}

impl DatabasePatch {
    /// A patch overwriting every mutable field with the record's values.
    pub fn full(database: &Database) -> Self {
        Self {
            name: Some(database.name.clone()),
            description: Some(database.description.clone()),
            engine_type: Some(database.engine_type.clone()),
            connect_info: Some(database.connect_info.clone()),
            share_config: Some(database.share_config.clone()),
            related_db_ids: Some(database.related_db_ids.clone()),
        }
    }

    /// Applies the patch to a record in place.
    pub fn apply(self, database: &mut Database) {
        if let Some(name) = self.name {
            database.name = name;
        }
        if let Some(description) = self.description {
            database.description = description;
        }
        if let Some(engine_type) = self.engine_type {
            database.engine_type = engine_type;
        }
        if let Some(connect_info) = self.connect_info {
            database.connect_info = connect_info;
        }
        if let Some(share_config) = self.share_config {
            database.share_config = share_config;
        }
        if let Some(related_db_ids) = self.related_db_ids {
            database.related_db_ids = related_db_ids;
        }
        database.updated_at = Utc::now();
    }
}

/// Mutable fields of a registered database.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseUpdate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub share_config: Option<ShareConfig>,
    #[serde(default)]
    pub related_db_ids: Option<Vec<String>>,
}

/// Request body for registering a database.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDatabaseRequest {
    /// Display name.
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Engine type key.
    #[serde(default = "CreateDatabaseRequest::default_engine")]
    pub engine_type: String,
    /// Credentials of the external database.
    #[validate(nested)]
    pub connect_info: ConnectInfo,
    /// Sharing rules; shared with everyone when absent.
    #[serde(default)]
    pub share_config: Option<ShareConfig>,
    /// Related peer databases.
    #[serde(default)]
    pub related_db_ids: Vec<String>,
}

impl CreateDatabaseRequest {
    fn default_engine() -> String {
        "mysql".to_string()
    }
}

/// Read view of a registered database together with its tables.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    #[serde(flatten)]
    pub database: Database,
    /// Tables of the database, newest first.
    pub tables: Vec<Table>,
    /// Number of introspected tables.
    pub table_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_accepts_string() {
        let info: ConnectInfo = serde_json::from_value(serde_json::json!({
            "host": "localhost",
            "user": "root",
            "password": "pw",
            "database": "shop",
            "port": "3307"
        }))
        .unwrap();
        assert_eq!(info.port, 3307);
        assert_eq!(info.username, "root");
        assert_eq!(info.charset, "utf8mb4");
    }

    #[test]
    fn test_debug_hides_password() {
        let info = ConnectInfo {
            password: "hunter2".into(),
            ..Default::default()
        };
        assert!(!format!("{info:?}").contains("hunter2"));
    }

    #[test]
    fn test_share_config_defaults_to_shared() {
        let config: ShareConfig = serde_json::from_str("{}").unwrap();
        assert!(config.is_shared);
        assert!(config.accessible_departments.is_empty());
    }

    #[test]
    fn test_missing_fields() {
        let info = ConnectInfo {
            host: "db".into(),
            ..Default::default()
        };
        assert_eq!(info.missing_fields(), vec!["username", "database"]);
    }
}
