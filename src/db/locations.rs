//! Taxonomy import and lookup
//!
//! The `Locations` and `NameTypes` tables are seeded from JSON exports and
//! then loaded into a [`LocationTree`] at startup.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::tree::{LocationNode, LocationTree};

/// Label for a node's semantic category (Continent, Country, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NameTypeRow {
    pub name_type_id: i64,
    pub name: String,
}

/// Read a taxonomy export (JSON array of `Locations` rows)
pub fn load_locations_file(path: &Path) -> Result<Vec<LocationNode>, StorageError> {
    let raw = std::fs::read_to_string(path)?;
    let nodes: Vec<LocationNode> = serde_json::from_str(&raw)?;
    debug!(path = %path.display(), count = nodes.len(), "Read taxonomy file");
    Ok(nodes)
}

/// Read a name type export (JSON array of `NameTypes` rows)
pub fn load_name_types_file(path: &Path) -> Result<Vec<NameTypeRow>, StorageError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn location_from_row(row: &Row) -> Result<LocationNode, rusqlite::Error> {
    Ok(LocationNode {
        id: row.get("Id")?,
        name: row.get("Name")?,
        name_type_id: row.get("NameTypeId")?,
        storage_type: row.get("Type")?,
        parent_id: row.get("ParentId")?,
        child_id: row.get("ChildId")?,
        level: row.get("Level")?,
    })
}

/// Replace the whole taxonomy in one transaction
pub fn replace_locations(conn: &mut Connection, nodes: &[LocationNode]) -> Result<usize, StorageError> {
    let tx = conn.transaction()
        .map_err(|e| StorageError::Internal(format!("Transaction failed: {}", e)))?;

    tx.execute("DELETE FROM Locations", [])?;
    {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO Locations (Id, Name, NameTypeId, Type, ParentId, ChildId, Level)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )?;
        for node in nodes {
            stmt.execute(params![
                node.id,
                node.name,
                node.name_type_id,
                node.storage_type,
                node.parent_id,
                node.child_id,
                node.level,
            ])?;
        }
    }

    tx.commit()
        .map_err(|e| StorageError::Internal(format!("Commit failed: {}", e)))?;

    info!(count = nodes.len(), "Imported taxonomy");
    Ok(nodes.len())
}

/// All taxonomy rows ordered by level, then id
pub fn list_locations(conn: &Connection) -> Result<Vec<LocationNode>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT Id, Name, NameTypeId, Type, ParentId, ChildId, Level FROM Locations ORDER BY Level, Id",
    )?;
    let nodes = stmt
        .query_map([], location_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes)
}

/// Insert or rename name types
pub fn upsert_name_types(conn: &mut Connection, rows: &[NameTypeRow]) -> Result<usize, StorageError> {
    let tx = conn.transaction()
        .map_err(|e| StorageError::Internal(format!("Transaction failed: {}", e)))?;
    for row in rows {
        tx.execute(
            r#"
            INSERT INTO NameTypes (NameTypeId, Name) VALUES (?1, ?2)
            ON CONFLICT(NameTypeId) DO UPDATE SET Name = excluded.Name
            "#,
            params![row.name_type_id, row.name],
        )?;
    }
    tx.commit()
        .map_err(|e| StorageError::Internal(format!("Commit failed: {}", e)))?;
    Ok(rows.len())
}

/// Name type id to label
pub fn name_type_labels(conn: &Connection) -> Result<HashMap<i64, String>, StorageError> {
    let mut stmt = conn.prepare("SELECT NameTypeId, Name FROM NameTypes")?;
    let labels = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(labels)
}

/// Load the stored taxonomy into memory
pub fn load_tree(conn: &Connection, separator: &str) -> Result<LocationTree, StorageError> {
    LocationTree::build(list_locations(conn)?, separator)
}
