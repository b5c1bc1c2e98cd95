//! Unique ID generator.
//!
//! Provides identifiers for registered databases and introspected tables.

use chrono::Utc;
use uuid::Uuid;

/// Generates unique identifiers for various entities.
pub struct IdGenerator;

impl IdGenerator {
    /// Generates a database id from its name and a random salt.
    ///
    /// # Returns
    /// `db_` followed by 32 hex characters.
    pub fn database_id(name: &str) -> String {
        let salt = Uuid::new_v4();
        format!("db_{}", Uuid::new_v5(&salt, name.as_bytes()).simple())
    }

    /// Generates a table id from the table name and the creation time.
    ///
    /// # Returns
    /// `table_` followed by 12 hex characters.
    pub fn table_id(table_name: &str) -> String {
        let salt = Uuid::new_v4();
        let seed = format!(
            "{}{}",
            table_name,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let hash = Uuid::new_v5(&salt, seed.as_bytes()).simple().to_string();
        format!("table_{}", &hash[..12])
    }
}
