//! Selection table provisioning
//!
//! Every node up to the materialization level gets a table named after it,
//! with one bitmask column per direct child. The column of child `c` stores
//! which of `c`'s own children are selected.

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bitmask::needs_text_storage;
use crate::db::schema_ops::{
    is_base_table, is_reserved_column, quote_ident, SchemaCapability, SqliteSchema,
    IS_DELETED_COLUMN, PERSON_ID_COLUMN,
};
use crate::error::StorageError;
use crate::tree::{LocationNode, LocationTree};

/// Result of a provisioning run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProvisionSummary {
    pub created: u64,
    pub skipped: u64,
    pub errors: Vec<String>,
}

/// Create any missing selection table for nodes at or above `max_level`
pub fn provision_selection_tables(
    conn: &Connection,
    tree: &LocationTree,
    max_level: u32,
) -> Result<ProvisionSummary, StorageError> {
    let schema = SqliteSchema::new(conn);
    let mut summary = ProvisionSummary::default();

    for node in tree.nodes().into_iter().filter(|node| node.level <= max_level) {
        if is_base_table(&node.name) {
            warn!(node = node.id, name = %node.name, "Location name collides with a base table; not provisioned");
            summary.skipped += 1;
            continue;
        }

        if schema.table_exists(&node.name)? {
            summary.skipped += 1;
            continue;
        }

        let sql = create_table_sql(tree, node);
        match conn.execute_batch(&sql) {
            Ok(()) => {
                debug!(table = %node.name, "Created selection table");
                summary.created += 1;
            }
            Err(e) => {
                warn!(table = %node.name, error = %e, "Failed to create selection table");
                summary.errors.push(format!("{}: {}", node.name, e));
            }
        }
    }

    info!(
        created = summary.created,
        skipped = summary.skipped,
        failed = summary.errors.len(),
        "Provisioned selection tables"
    );

    Ok(summary)
}

/// `CREATE TABLE` statement for one node's selection table
pub fn create_table_sql(tree: &LocationTree, node: &LocationNode) -> String {
    let sanitized = sanitize_identifier(&node.name);

    let mut lines = vec![format!("    {} INTEGER NOT NULL", PERSON_ID_COLUMN)];
    for child in tree.children_of(node.id) {
        if is_reserved_column(&child.name) {
            warn!(table = %node.name, column = %child.name, "Child name collides with a reserved column; skipped");
            continue;
        }
        lines.push(format!("    {} {}", quote_ident(&child.name), column_type(tree, child)));
    }
    lines.push(format!("    {} INTEGER", IS_DELETED_COLUMN));
    // No FOREIGN KEY to Persons: person rows are owned elsewhere and may not exist here
    lines.push(format!("    CONSTRAINT PK_{} PRIMARY KEY ({})", sanitized, PERSON_ID_COLUMN));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
        quote_ident(&node.name),
        lines.join(",\n")
    )
}

/// Declared type for the column holding `child`'s selection
fn column_type(tree: &LocationTree, child: &LocationNode) -> String {
    if needs_text_storage(tree.child_bit_width(child.id)) {
        return "TEXT".to_string();
    }

    // NVARCHAR(MAX) and friends lose their size suffix
    let base = child
        .storage_type
        .split('(')
        .next()
        .unwrap_or_default();
    let declared: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == ' ')
        .collect::<String>()
        .trim()
        .to_ascii_uppercase();

    if declared.is_empty() {
        "INTEGER".to_string()
    } else {
        declared
    }
}

/// Replace anything outside `[A-Za-z0-9_]` with `_`
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
