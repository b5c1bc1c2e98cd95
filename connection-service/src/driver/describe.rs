//! Rendering of the precomputed structural table description.

use std::fmt::Write;

use super::TableSchema;

/// Renders columns, nullability, keys, defaults, extras, comments and
/// indexes of a table into the text stored as `total_description`.
pub fn render_table_description(qualified_name: &str, table: &TableSchema) -> String {
    let mut out = String::new();

    if table.comment.is_empty() {
        let _ = writeln!(out, "Table `{qualified_name}`");
    } else {
        let _ = writeln!(out, "Table `{qualified_name}`: {}", table.comment);
    }

    out.push_str("\nField | Type | Null | Key | Default | Extra | Comment\n");
    out.push_str("--- | --- | --- | --- | --- | --- | ---\n");
    for column in &table.columns {
        let _ = writeln!(
            out,
            "{} | {} | {} | {} | {} | {} | {}",
            column.name,
            column.column_type,
            if column.nullable { "YES" } else { "NO" },
            column.key,
            column.default.as_deref().unwrap_or("NULL"),
            column.extra,
            column.comment,
        );
    }

    if !table.indexes.is_empty() {
        out.push_str("\nIndexes:\n");
        for index in &table.indexes {
            let _ = writeln!(
                out,
                "- {}{}: {}",
                index.name,
                if index.unique { " (unique)" } else { "" },
                index.columns.join(", ")
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ColumnSchema, IndexSchema};

    fn orders() -> TableSchema {
        TableSchema {
            name: "orders".into(),
            comment: "order headers".into(),
            columns: vec![
                ColumnSchema {
                    name: "id".into(),
                    column_type: "bigint".into(),
                    nullable: false,
                    key: "PRI".into(),
                    default: None,
                    extra: "auto_increment".into(),
                    comment: "primary key".into(),
                },
                ColumnSchema {
                    name: "user_id".into(),
                    column_type: "bigint".into(),
                    nullable: true,
                    key: "MUL".into(),
                    default: Some("0".into()),
                    extra: String::new(),
                    comment: String::new(),
                },
            ],
            indexes: vec![
                IndexSchema {
                    name: "PRIMARY".into(),
                    unique: true,
                    columns: vec!["id".into()],
                },
                IndexSchema {
                    name: "idx_user".into(),
                    unique: false,
                    columns: vec!["user_id".into()],
                },
            ],
        }
    }

    #[test]
    fn test_description_lists_columns_and_indexes() {
        let text = render_table_description("shop.orders", &orders());
        assert!(text.starts_with("Table `shop.orders`: order headers"));
        assert!(text.contains("id | bigint | NO | PRI | NULL | auto_increment | primary key"));
        assert!(text.contains("user_id | bigint | YES | MUL | 0 |  | "));
        assert!(text.contains("- PRIMARY (unique): id"));
        assert!(text.contains("- idx_user: user_id"));
    }

    #[test]
    fn test_description_without_indexes() {
        let mut table = orders();
        table.indexes.clear();
        table.comment.clear();
        let text = render_table_description("shop.orders", &table);
        assert!(text.starts_with("Table `shop.orders`\n"));
        assert!(!text.contains("Indexes:"));
    }
}
