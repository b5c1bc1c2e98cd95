//! Introspected table models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One table introspected from a registered database's schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Table {
    /// Opaque id, unique within a connector's cache.
    pub table_id: String,
    /// Owning database id.
    pub database_id: String,
    /// Qualified name, e.g. `shop.orders`.
    pub tablename: String,
    /// Engine comment of the table.
    #[serde(default)]
    pub description: String,
    /// Full structural description computed at introspection time.
    #[serde(default)]
    pub total_description: String,
    /// Whether the table is in the exposed (selected) set.
    #[serde(default)]
    pub is_choose: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Field-wise update applied by the metadata store.
#[derive(Debug, Clone, Default)]
pub struct TablePatch {
    pub tablename: Option<String>,
    pub description: Option<String>,
    pub total_description: Option<String>,
    pub is_choose: Option<bool>,
}

impl TablePatch {
    /// Applies the patch to a record in place.
    pub fn apply(self, table: &mut Table) {
        if let Some(tablename) = self.tablename {
            table.tablename = tablename;
        }
        if let Some(description) = self.description {
            table.description = description;
        }
        if let Some(total_description) = self.total_description {
            table.total_description = total_description;
        }
        if let Some(is_choose) = self.is_choose {
            table.is_choose = is_choose;
        }
        table.updated_at = Utc::now();
    }
}
